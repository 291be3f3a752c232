/// SCSI command dispatch through the facade with a recording SG transport
mod common;

use common::fakes::{FakeNvme, FakeSg, SgReply};
use common::HostFixture;
use sayonara_passthrough::passthrough::sg::{DEFAULT_COMMAND_TIMEOUT_MS, SPC3_SENSE_LEN};
use sayonara_passthrough::*;
use std::sync::Arc;

struct Rig {
    _fixture: HostFixture,
    pt: Passthrough,
    sg: Arc<FakeSg>,
    device: DeviceIdentity,
}

fn rig(reply: SgReply) -> Rig {
    let fixture = HostFixture::new();
    let path = fixture.add_drive("sdc");
    let sg = Arc::new(FakeSg::with_reply(reply));
    let pt = Passthrough::new(fixture.settings())
        .with_sg_transport(sg.clone())
        .with_nvme_subsystem(Arc::new(FakeNvme::new(None)));
    let device = pt
        .open_device(&path, OpenMode::HandleOnly)
        .expect("Failed to open fixture drive");
    Rig {
        _fixture: fixture,
        pt,
        sg,
        device,
    }
}

fn not_ready_sense() -> Vec<u8> {
    let mut sense = vec![0u8; 18];
    sense[0] = 0x70;
    sense[2] = 0x02;
    sense[7] = 10;
    sense[12] = 0x3a;
    sense
}

#[test]
fn test_unrecognized_direction_issues_no_ioctl() {
    let mut rig = rig(SgReply::default());
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::Other(7));

    let err = rig.pt.send_io(&mut rig.device, &mut ctx).unwrap_err();
    assert_eq!(err.code(), ReturnCode::BadParameter);
    assert_eq!(rig.sg.ioctl_count(), 0);
}

#[test]
fn test_inquiry_data_reaches_caller() {
    let mut inquiry = vec![0u8; 96];
    inquiry[8..16].copy_from_slice(b"ATA     ");
    inquiry[16..32].copy_from_slice(b"ST2000NM0055    ");
    let mut rig = rig(SgReply {
        data: inquiry,
        ..SgReply::default()
    });

    let cdb = [0x12u8, 0, 0, 0, 96, 0];
    let mut data = [0u8; 96];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::In);
    rig.pt.send_io(&mut rig.device, &mut ctx).unwrap();
    assert!(!ctx.return_status.has_sense());

    assert_eq!(&data[8..16], b"ATA     ");
    assert_eq!(&data[16..32], b"ST2000NM0055    ");
    assert_eq!(rig.sg.ioctl_count(), 1);
    assert_eq!(rig.device.last_error, Some(0));
}

#[test]
fn test_host_status_without_sense_fails() {
    let mut rig = rig(SgReply {
        info: 1,
        host_status: 0x01,
        ..SgReply::default()
    });
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::None);

    let err = rig.pt.send_io(&mut rig.device, &mut ctx).unwrap_err();
    assert_eq!(err.code(), ReturnCode::PassthroughFailure);
    assert!(!ctx.return_status.has_sense());
}

#[test]
fn test_check_condition_with_sense_reports_fields() {
    let mut rig = rig(SgReply {
        info: 1,
        masked_status: 0x01,
        host_status: 0x01,
        sense: not_ready_sense(),
        ..SgReply::default()
    });
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::None);

    rig.pt.send_io(&mut rig.device, &mut ctx).unwrap();
    assert!(ctx.return_status.has_sense());
    assert_eq!(ctx.return_status.format, 0x70);
    assert_eq!(ctx.return_status.sense_key, 0x02);
    assert_eq!(ctx.return_status.asc, 0x3a);
}

#[test]
fn test_caller_sense_buffer_is_filled() {
    let mut rig = rig(SgReply {
        info: 1,
        masked_status: 0x01,
        sense: not_ready_sense(),
        ..SgReply::default()
    });
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut sense = [0u8; SPC3_SENSE_LEN];
    let mut ctx =
        ScsiIoCtx::new(&cdb, &mut data, DataDirection::None).with_sense(&mut sense);

    rig.pt.send_io(&mut rig.device, &mut ctx).unwrap();
    drop(ctx);
    assert_eq!(sense[0], 0x70);
    assert_eq!(sense[12], 0x3a);
}

#[test]
fn test_default_timeout_applied() {
    let mut rig = rig(SgReply::default());
    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::None);

    rig.pt.send_io(&mut rig.device, &mut ctx).unwrap();
    assert_eq!(
        *rig.sg.last_timeout_ms.lock().unwrap(),
        Some(DEFAULT_COMMAND_TIMEOUT_MS)
    );
}

#[test]
fn test_closed_device_is_rejected() {
    let mut rig = rig(SgReply::default());
    rig.pt.close_device(&mut rig.device).unwrap();

    let cdb = [0u8; 6];
    let mut data = [0u8; 0];
    let mut ctx = ScsiIoCtx::new(&cdb, &mut data, DataDirection::None);
    let err = rig.pt.send_io(&mut rig.device, &mut ctx).unwrap_err();
    assert_eq!(err.code(), ReturnCode::BadParameter);
    assert_eq!(rig.sg.ioctl_count(), 0);

    let again = rig.pt.close_device(&mut rig.device).unwrap_err();
    assert_eq!(again.code(), ReturnCode::BadParameter);
}
