//! Interrupt Registration Tests
//!
//! Validates that slot line registration is all-or-nothing and that
//! teardown returns every line to the controller.

use core_types::{CoreError, PLATFORM_INTERRUPTS};
use device::DeviceConfig;
use hal::{IrqHandler, IrqReturn};
use sim_device::{FaultPlan, IrqFault};
use std::sync::Arc;
use tests_resilience::{build_rig, test_bootstrap, VECTOR_BASE};

const SLOTS: usize = 6;

#[test]
fn test_failure_at_line_k_leaves_nothing_mapped() {
    for k in 0..SLOTS {
        let plan = FaultPlan::new().with_irq_fault(IrqFault::FailRequest {
            line: PLATFORM_INTERRUPTS + k,
            code: -16,
        });
        let rig = build_rig(DeviceConfig::default().with_slots(SLOTS), plan).unwrap();

        let err = rig.device.init().unwrap_err();
        assert_eq!(
            err,
            CoreError::DeviceError {
                code: -16,
                context: format!(
                    "request of interrupt vector {} failed",
                    VECTOR_BASE + (PLATFORM_INTERRUPTS + k) as u32
                ),
            }
        );

        for line in 0..PLATFORM_INTERRUPTS + SLOTS {
            assert_eq!(rig.device.line_mapping(line), None, "line {} after fault at {}", line, k);
        }
        assert_eq!(rig.controller.registered_count(), 0);
        assert_eq!(rig.controller.request_count(), rig.controller.free_count());
    }
}

#[test]
fn test_missing_vector_reports_exhaustion() {
    let plan = FaultPlan::new().with_irq_fault(IrqFault::NoVector {
        line: PLATFORM_INTERRUPTS + 3,
    });
    let rig = build_rig(DeviceConfig::default().with_slots(SLOTS), plan).unwrap();
    assert!(matches!(rig.device.init(), Err(CoreError::ResourceExhausted(_))));
    assert_eq!(rig.controller.registered_count(), 0);
}

#[test]
fn test_double_init_is_invalid_state() {
    let rig = test_bootstrap(SLOTS);
    assert_eq!(rig.controller.registered_count(), SLOTS);
    assert!(matches!(rig.device.init(), Err(CoreError::InvalidState(_))));
    assert_eq!(rig.controller.registered_count(), SLOTS);
}

#[test]
fn test_remove_releases_slot_and_platform_lines() {
    let rig = test_bootstrap(SLOTS);
    let handler: IrqHandler = Arc::new(|| IrqReturn::Handled);
    rig.device.request_platform_irq(0, handler.clone()).unwrap();
    rig.device.request_platform_irq(5, handler).unwrap();
    assert_eq!(rig.controller.registered_count(), SLOTS + 2);

    rig.device.remove();
    assert_eq!(rig.controller.registered_count(), 0);
    assert!((0..PLATFORM_INTERRUPTS + SLOTS).all(|line| rig.device.line_mapping(line).is_none()));
}

#[test]
fn test_platform_line_bounds() {
    let rig = test_bootstrap(1);
    let handler: IrqHandler = Arc::new(|| IrqReturn::Handled);
    assert!(matches!(
        rig.device.request_platform_irq(PLATFORM_INTERRUPTS, handler),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(rig.device.release_platform_irq(2).is_ok());
}
