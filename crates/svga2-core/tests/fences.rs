mod common;

use common::{engine, engine_with, modern_caps};
use pretty_assertions::assert_eq;
use svga2_core::{DeviceIo, FenceProgress, SubmitFlags, SvgaConfig};
use svga2_proto::fifo::SVGA_FIFO_FENCE;
use svga2_proto::{CbStatus, FifoCaps, SvgaReg};

#[test]
fn fence_ids_are_monotonic_from_one() {
    let mut svga = engine();
    assert_eq!(svga.fence_get().unwrap(), 1);
    assert_eq!(svga.fence_get().unwrap(), 2);
    assert_eq!(svga.fence_get().unwrap(), 3);
}

#[test]
fn wrap_flushes_and_restarts_the_epoch() {
    let mut svga = engine();
    svga.fence_seed(u32::MAX, Some(u32::MAX - 1));
    assert_eq!(svga.fence_get().unwrap(), u32::MAX);

    // The counter is now wrapped to zero; the next allocation flushes
    // outstanding work and restarts at 1, skipping the reserved zero id.
    assert_eq!(svga.fence_get().unwrap(), 1);
    assert_eq!(svga.fence_query().last, Some(1));
}

#[test]
fn wrap_resets_fifo_fence_progress() {
    let mut svga = engine();
    // The device had passed a late pre-wrap fence.
    svga.device_mut().fifo_write(SVGA_FIFO_FENCE, u32::MAX - 5);
    svga.fence_seed(0, Some(u32::MAX - 5));

    svga.device_mut().doorbells_before_complete = 2;
    let id = svga.cmb_alloc(1).unwrap();
    svga.cmb_writer(id).unwrap().update(0, 0, 6, 6);
    svga.cmb_submit(id, SubmitFlags::FENCE, None).unwrap();
    assert_eq!(
        svga.fence_query(),
        FenceProgress {
            passed: 0,
            last: Some(1),
        }
    );

    // The wait polls the device to completion instead of being satisfied
    // by the stale pre-wrap value.
    svga.fence_wait(1).unwrap();
    assert_eq!(svga.fence_query().passed, 1);
    assert!(svga.cmb_poll(Some(id)).unwrap());
    assert_eq!(svga.cmb_status(id).unwrap().0, CbStatus::Completed);
    svga.cmb_free(id).unwrap();
}

#[test]
fn register_only_progress_stays_stale_across_a_wrap() {
    let mut svga = engine_with(modern_caps(), FifoCaps::empty(), SvgaConfig::default());
    svga.device_mut().write_reg(SvgaReg::Fence, u32::MAX - 5);
    svga.fence_seed(0, Some(u32::MAX - 5));

    assert_eq!(svga.fence_get().unwrap(), 1);
    // The register file cannot be reset from the guest; waits on the
    // fresh id return early against the pre-wrap value rather than hang.
    assert_eq!(svga.fence_query().passed, u32::MAX - 5);
    svga.fence_wait(1).unwrap();
}

#[test]
fn fenced_submission_advances_device_progress() {
    let mut svga = engine();
    let id = svga.cmb_alloc(1).unwrap();
    svga.cmb_writer(id).unwrap().update(0, 0, 10, 10);
    svga.cmb_submit(id, SubmitFlags::SYNC | SubmitFlags::FENCE, None)
        .unwrap();

    assert_eq!(
        svga.fence_query(),
        FenceProgress {
            passed: 1,
            last: Some(1),
        }
    );
    svga.fence_wait(1).unwrap();
    svga.cmb_free(id).unwrap();
}

#[test]
fn waits_on_unissued_or_zero_fences_return_immediately() {
    let mut svga = engine();
    svga.fence_wait(0).unwrap();
    // No fence issued yet at all.
    svga.fence_wait(7).unwrap();

    let first = svga.fence_get().unwrap();
    // Beyond the newest issued id: nothing to wait for.
    svga.fence_wait(first + 10).unwrap();
}

#[test]
fn progress_reads_fall_back_to_the_register_file() {
    // No FIFO fence capability: completion is read from the register.
    let mut svga = engine_with(
        modern_caps(),
        FifoCaps::empty(),
        SvgaConfig::default(),
    );
    let id = svga.cmb_alloc(1).unwrap();
    svga.cmb_writer(id).unwrap().update(0, 0, 2, 2);
    svga.cmb_submit(id, SubmitFlags::SYNC | SubmitFlags::FENCE, None)
        .unwrap();

    assert_eq!(svga.fence_query().passed, 1);
    svga.cmb_free(id).unwrap();
}
