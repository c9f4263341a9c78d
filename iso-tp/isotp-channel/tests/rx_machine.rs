use core::time::Duration;
use std::cell::Cell;

use isotp_channel::pdu::{FlowStatus, Pdu};
use isotp_channel::rx::{RxMachine, RxOutcome, RxState};
use isotp_channel::{IsoTpConfig, IsoTpError, MicrosClock, RxFlowControl, Storage, TimeoutKind};

fn cfg_with_block_size(block_size: u8) -> IsoTpConfig {
    IsoTpConfig {
        block_size,
        ..IsoTpConfig::default()
    }
}

#[test]
fn rx_machine_single_frame_and_collect() {
    let now = Cell::new(0u64);
    let clock = MicrosClock::new(|| now.get());
    let cfg = cfg_with_block_size(0);
    let rx_fc = RxFlowControl::from_config(&cfg);
    let mut buf = [0u8; 8];
    let mut rx = RxMachine::new(Storage::Borrowed(&mut buf), 8);

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::SingleFrame {
            len: 2,
            data: &[0xAA, 0xBB],
        },
        0,
    );
    assert_eq!(out, RxOutcome::Completed(2));
    assert_eq!(rx.completed(), &[0xAA, 0xBB]);

    let mut collected = [0u8; 2];
    assert_eq!(rx.take(&mut collected), Ok(2));
    assert_eq!(rx.state(), RxState::Idle);
    assert!(rx.completed().is_empty());
}

#[test]
fn rx_machine_reports_overflow_for_single_and_first_frames() {
    let now = Cell::new(0u64);
    let clock = MicrosClock::new(|| now.get());
    let cfg = cfg_with_block_size(0);
    let rx_fc = RxFlowControl::from_config(&cfg);
    let mut buf = [0u8; 2];
    let mut rx = RxMachine::new(Storage::Borrowed(&mut buf), 2);

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::SingleFrame {
            len: 3,
            data: &[0, 1, 2],
        },
        0,
    );
    assert_eq!(out, RxOutcome::Aborted(IsoTpError::Overflow));
    assert_eq!(rx.state(), RxState::Error);
    rx.reset();

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::FirstFrame {
            len: 10,
            data: &[0; 6],
        },
        0,
    );
    match out {
        RxOutcome::Rejected(fc) => {
            assert_eq!(fc.status, FlowStatus::Overflow);
            assert_eq!(fc.block_size, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let mut collected = [0u8; 2];
    assert_eq!(rx.take(&mut collected), Err(IsoTpError::Overflow));
}

#[test]
fn rx_machine_requests_flow_control_at_block_boundaries() {
    let now = Cell::new(0u64);
    let clock = MicrosClock::new(|| now.get());
    let cfg = cfg_with_block_size(1);
    let rx_fc = RxFlowControl {
        block_size: 1,
        st_min: Duration::from_millis(5),
    };
    let mut buf = [0u8; 32];
    let mut rx = RxMachine::new(Storage::Borrowed(&mut buf), 32);

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::FirstFrame {
            len: 20,
            data: &[0; 6],
        },
        0,
    );
    match out {
        RxOutcome::SendFlowControl(fc) => {
            assert_eq!(fc.status, FlowStatus::ClearToSend);
            assert_eq!(fc.block_size, 1);
            assert_eq!(fc.st_min_raw(), 5);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::ConsecutiveFrame {
            sn: 1,
            data: &[1; 7],
        },
        0,
    );
    assert!(matches!(out, RxOutcome::SendFlowControl(_)));

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::ConsecutiveFrame {
            sn: 2,
            data: &[2; 7],
        },
        0,
    );
    assert_eq!(out, RxOutcome::Completed(20));
    let mut collected = [0u8; 20];
    assert_eq!(rx.take(&mut collected), Ok(20));
    assert_eq!(collected[6..13], [1; 7]);
    assert_eq!(collected[13..], [2; 7]);
}

#[test]
fn rx_machine_ignores_stray_consecutive_and_flow_control_frames() {
    let now = Cell::new(0u64);
    let clock = MicrosClock::new(|| now.get());
    let cfg = cfg_with_block_size(0);
    let rx_fc = RxFlowControl::from_config(&cfg);
    let mut buf = [0u8; 8];
    let mut rx = RxMachine::new(Storage::Borrowed(&mut buf), 8);

    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::ConsecutiveFrame {
            sn: 1,
            data: &[0; 7],
        },
        0,
    );
    assert_eq!(out, RxOutcome::None);
    let out = rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::FlowControl {
            status: FlowStatus::ClearToSend,
            block_size: 0,
            st_min: 0,
        },
        0,
    );
    assert_eq!(out, RxOutcome::None);
    assert_eq!(rx.state(), RxState::Idle);
}

#[test]
fn rx_machine_deadline_follows_last_frame() {
    let now = Cell::new(0u64);
    let clock = MicrosClock::new(|| now.get());
    let cfg = cfg_with_block_size(0);
    let rx_fc = RxFlowControl::from_config(&cfg);
    let mut buf = [0u8; 32];
    let mut rx = RxMachine::new(Storage::Borrowed(&mut buf), 32);

    rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::FirstFrame {
            len: 20,
            data: &[0; 6],
        },
        0,
    );
    rx.on_pdu(
        &cfg,
        &clock,
        &rx_fc,
        Pdu::ConsecutiveFrame {
            sn: 1,
            data: &[0; 7],
        },
        80_000,
    );
    assert_eq!(rx.on_tick(150_000), None);
    assert_eq!(
        rx.on_tick(180_000),
        Some(IsoTpError::Timeout(TimeoutKind::NCr))
    );
    assert_eq!(rx.state(), RxState::Error);
}
