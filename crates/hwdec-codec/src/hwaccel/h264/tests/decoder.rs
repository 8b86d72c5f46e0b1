use std::rc::Rc;

use bytes::Bytes;
use hwdec_core::HwdecError;

use crate::parsers::h264::test_streams::{PpsParams, SliceParams, SpsParams};

use super::super::{DecoderConfig, H264HwDecoder, VDP_INVALID_HANDLE};
use super::helpers::*;

type TestDecoder = H264HwDecoder<MockBackend>;

fn new_decoder(config: DecoderConfig) -> TestDecoder {
    init_test_logging();
    H264HwDecoder::new(MockBackend::new(), config)
}

/// 参数集加切片序列
fn stream(sps: &SpsParams, pps: &PpsParams, slices: &[SliceParams]) -> Vec<Bytes> {
    let mut nals = vec![sps_nal(sps), pps_nal(pps)];
    nals.extend(slices.iter().map(|slice| slice_nal(sps, pps, slice)));
    nals
}

fn feed(decoder: &mut TestDecoder, nals: &[Bytes]) {
    for nal in nals {
        decoder.decode_nal(nal.clone()).expect("解码不应失败");
    }
}

/// I0 P8 B4 B6 P16 (解码顺序)
fn reordered_slices() -> Vec<SliceParams> {
    vec![
        SliceParams::idr(0),
        SliceParams {
            poc_lsb: 8,
            ..SliceParams::p(1)
        },
        SliceParams::b(2, 4),
        SliceParams::b(2, 6),
        SliceParams {
            poc_lsb: 16,
            ..SliceParams::p(2)
        },
    ]
}

fn field_sps() -> SpsParams {
    SpsParams {
        frame_mbs_only: false,
        height_map_units: 15,
        ..SpsParams::default()
    }
}

#[test]
fn test_single_idr_waits_in_dpb() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0)]));
    assert!(decoder.backend().submitted.is_empty(), "访问单元结束前不应提交");

    feed(&mut decoder, &[slice_nal(&sps, &pps, &SliceParams::p(1))]);
    let backend = decoder.backend();
    assert_eq!(backend.submitted.len(), 1);
    assert!(backend.presented.is_empty(), "DPB 未满时不应输出");

    let info = &backend.submitted[0].info;
    assert!(info.is_reference);
    assert_eq!(info.frame_num, 0);
    assert_eq!(info.field_order_cnt, [0, 0]);
    assert_eq!(info.slice_count, 1);
    assert_eq!(info.num_ref_frames, 4);
    assert_eq!(info.log2_max_pic_order_cnt_lsb_minus4, 2);
    assert!(info.frame_mbs_only_flag);
    assert_eq!(info.scaling_lists_4x4[0], [16; 16], "未携带矩阵时为 Flat_4x4_16");
    assert!(info.reference_frames.iter().all(|entry| entry.surface == VDP_INVALID_HANDLE));

    let dpb = decoder.dpb();
    assert_eq!(dpb.used(), 1);
    let (_, pic) = dpb.iter().next().unwrap();
    assert!(pic.is_reference());
    assert!(pic.is_idr());
    assert!(pic.delayed_output);

    decoder.flush().unwrap();
    let backend = decoder.backend();
    assert_eq!(backend.presented_pocs(), vec![0, 2]);
    assert!(backend.submitted[1].info.reference_frames[0].is_valid());
    assert_eq!(backend.submitted[1].info.reference_frames[0].surface, 100);
}

#[test]
fn test_output_follows_poc_order() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    feed(&mut decoder, &stream(&sps, &pps, &reordered_slices()));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    assert_eq!(backend.presented_pocs(), vec![0, 4, 6, 8, 16]);
    assert!(!backend.submitted[2].info.is_reference);
    let valid = backend.submitted[2]
        .info
        .reference_frames
        .iter()
        .filter(|entry| entry.is_valid())
        .count();
    assert_eq!(valid, 2, "B 帧的参考列表包含 I 与 P");

    let stats = decoder.stats();
    assert_eq!(stats.access_units, 5);
    assert_eq!(stats.pictures_decoded, 5);
    assert_eq!(stats.pictures_output, 5);
    assert_eq!(stats.idr_pictures, 1);
    assert_eq!(stats.slices, 5);
    assert_eq!(stats.nals, 7);
}

#[test]
fn test_small_dpb_bumps_early() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default().with_dpb_size(3));
    assert_eq!(decoder.dpb().size(), 3);

    feed(&mut decoder, &stream(&sps, &pps, &reordered_slices()));
    assert_eq!(
        decoder.backend().presented_pocs(),
        vec![0, 4, 6],
        "DPB 占满时按 POC 输出"
    );

    decoder.flush().unwrap();
    assert_eq!(decoder.backend().presented_pocs(), vec![0, 4, 6, 8, 16]);
    // 非参考的 B 帧输出后立即释放
    assert_eq!(decoder.backend().released_count(), 2);
}

#[test]
fn test_idr_drains_previous_pictures() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams::idr(0),
        SliceParams::p(1),
        SliceParams::idr(1),
        SliceParams::p(1),
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2]);
    assert_eq!(decoder.backend().released_count(), 2, "IDR 之前的图像输出后释放");

    decoder.flush().unwrap();
    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2, 0, 2]);
    assert_eq!(decoder.stats().idr_pictures, 2);
}

#[test]
fn test_no_output_of_prior_pics_discards() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams::idr(0),
        SliceParams::p(1),
        SliceParams {
            no_output_of_prior_pics: true,
            ..SliceParams::idr(1)
        },
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    assert_eq!(backend.presented.len(), 1, "之前的图像不应输出");
    assert_eq!(backend.presented[0].surface, 102);
    assert_eq!(backend.released_count(), 2);
}

#[test]
fn test_mmco5_outputs_prior_pictures_first() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams::idr(0),
        SliceParams::p(1),
        SliceParams {
            poc_lsb: 8,
            mmco: Some(vec![(5, 0, 0)]),
            ..SliceParams::p(2)
        },
        SliceParams::p(1),
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2]);

    decoder.flush().unwrap();
    let backend = decoder.backend();
    assert_eq!(backend.presented_pocs(), vec![0, 2, 0, 2], "MMCO 5 图像的 POC 复位为 0");
    assert_eq!(backend.presented[2].frame_num, 0);
}

#[test]
fn test_complementary_fields_share_surface() {
    let sps = field_sps();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams {
            field: Some(false),
            ..SliceParams::idr(0)
        },
        SliceParams {
            field: Some(true),
            poc_lsb: 1,
            ..SliceParams::idr(0)
        },
        SliceParams {
            field: Some(false),
            poc_lsb: 4,
            ..SliceParams::p(1)
        },
        SliceParams {
            field: Some(true),
            poc_lsb: 5,
            ..SliceParams::p(1)
        },
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    let surfaces: Vec<u32> = backend.submitted.iter().map(|s| s.surface).collect();
    assert_eq!(surfaces, vec![100, 100, 101, 101], "互补场共用一个表面");
    assert_eq!(backend.submitted[0].info.field_order_cnt, [0, 0]);
    assert_eq!(backend.submitted[1].info.field_order_cnt, [0, 1]);
    assert!(backend.submitted[1].info.bottom_field_flag);

    let reference = backend.submitted[2].info.reference_frames[0];
    assert_eq!(reference.surface, 100);
    assert!(reference.top_is_reference && reference.bottom_is_reference);
    assert_eq!(reference.field_order_cnt, [0, 1]);

    assert_eq!(backend.presented.len(), 2);
    assert!(backend.presented.iter().all(|p| p.complete));
    assert_eq!(backend.presented_pocs(), vec![0, 4]);
    assert_eq!(decoder.stats().pictures_decoded, 4);
    assert_eq!(decoder.stats().idr_pictures, 1);
}

#[test]
fn test_unpaired_fields_when_pairing_disabled() {
    let sps = field_sps();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default().with_pair_fields(false));

    let slices = [
        SliceParams {
            field: Some(false),
            ..SliceParams::p(0)
        },
        SliceParams {
            field: Some(true),
            poc_lsb: 1,
            ..SliceParams::p(0)
        },
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    let surfaces: Vec<u32> = backend.submitted.iter().map(|s| s.surface).collect();
    assert_eq!(surfaces, vec![100, 101]);
    assert_eq!(backend.presented.len(), 2);
    assert!(backend.presented.iter().all(|p| !p.complete));
}

#[test]
fn test_lone_field_stays_single_field_picture() {
    let sps = field_sps();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams {
            field: Some(false),
            ..SliceParams::idr(0)
        },
        SliceParams {
            poc_lsb: 4,
            ..SliceParams::p(1)
        },
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    let surfaces: Vec<u32> = backend.submitted.iter().map(|s| s.surface).collect();
    assert_eq!(surfaces, vec![100, 101], "帧图像不与孤立的场配对");

    let reference = backend.submitted[1].info.reference_frames[0];
    assert_eq!(reference.surface, 100);
    assert!(reference.top_is_reference);
    assert!(!reference.bottom_is_reference);
    assert_eq!(reference.field_order_cnt, [0, 0]);

    assert_eq!(backend.presented_pocs(), vec![0, 4]);
    assert!(!backend.presented[0].complete);
    assert!(backend.presented[1].complete);
}

#[test]
fn test_slices_coalesce_into_one_picture() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let slices = [
        SliceParams::idr(0),
        SliceParams {
            first_mb: 600,
            ..SliceParams::idr(0)
        },
    ];
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    assert_eq!(backend.submitted.len(), 1);
    assert_eq!(backend.submitted[0].slice_count, 2);
    assert_eq!(backend.submitted[0].info.slice_count, 2);
    assert_eq!(decoder.stats().slices, 2);
    assert_eq!(decoder.stats().access_units, 1);
}

#[test]
fn test_annex_b_packet() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    let nals = stream(&sps, &pps, &[SliceParams::idr(0), SliceParams::p(1)]);
    decoder.decode_packet(&annex_b(&nals)).unwrap();
    decoder.flush().unwrap();

    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2]);
    assert_eq!(decoder.stats().nals, 4);
}

#[test]
fn test_avcc_config_and_length_prefixed_packets() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let sps_bytes = sps_nal(&sps);
    let pps_bytes = pps_nal(&pps);

    let mut avcc = vec![1, 66, 0, 30, 0xFF, 0xE1];
    avcc.extend_from_slice(&(sps_bytes.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&sps_bytes);
    avcc.push(1);
    avcc.extend_from_slice(&(pps_bytes.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&pps_bytes);

    let mut decoder = new_decoder(DecoderConfig::default());
    decoder.load_avcc_config(&Bytes::from(avcc)).unwrap();
    assert!(decoder.parser().sps(0).is_some());
    assert!(decoder.parser().pps(0).is_some());

    let mut packet = Vec::new();
    for slice in [SliceParams::idr(0), SliceParams::p(1)] {
        let nal = slice_nal(&sps, &pps, &slice);
        packet.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        packet.extend_from_slice(&nal);
    }
    decoder.decode_packet(&Bytes::from(packet)).unwrap();
    decoder.flush().unwrap();
    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2]);

    // 截断的样本整体丢弃
    decoder
        .decode_packet(&Bytes::from_static(&[0, 0, 0, 9, 0x65]))
        .unwrap();
    assert_eq!(decoder.backend().submitted.len(), 2);
}

#[test]
fn test_sps_change_drains_before_new_sequence() {
    let sps = SpsParams::default();
    let wide = SpsParams {
        width_mbs: 80,
        ..SpsParams::default()
    };
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default().with_drain_on_idr(false));

    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0), SliceParams::p(1)]));
    feed(&mut decoder, &stream(&wide, &pps, &[SliceParams::idr(1)]));
    decoder.flush().unwrap();

    let backend = decoder.backend();
    assert_eq!(backend.presented_pocs(), vec![0, 2, 0]);
    let surfaces: Vec<u32> = backend.presented.iter().map(|p| p.surface).collect();
    assert_eq!(surfaces, vec![100, 101, 102]);
}

#[test]
fn test_end_of_sequence_outputs_everything() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0), SliceParams::p(1)]));
    decoder.decode_nal(Bytes::from_static(&[0x0A])).unwrap();

    assert_eq!(decoder.backend().presented_pocs(), vec![0, 2]);
    assert!(decoder.dpb().is_empty(), "序列结束后参考全部清除");
    assert_eq!(decoder.backend().released_count(), 2);
}

#[test]
fn test_broken_input_is_dropped() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());

    decoder.decode_nal(Bytes::from_static(&[0x80])).unwrap();
    decoder.decode_nal(Bytes::new()).unwrap();
    // 缺少参数集的切片
    decoder.decode_nal(slice_nal(&sps, &pps, &SliceParams::idr(0))).unwrap();
    assert_eq!(decoder.stats().dropped_nals, 3);

    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0)]));
    decoder.flush().unwrap();
    assert_eq!(decoder.backend().presented_pocs(), vec![0]);
}

#[test]
fn test_backend_failure_frees_frame() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());
    decoder.backend_mut().fail_decode = true;

    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0)]));
    let err = decoder.flush().unwrap_err();
    assert!(matches!(err, HwdecError::Backend(_)), "actual={err}");
    assert_eq!(decoder.backend().released_count(), 1, "提交失败的帧应立即归还");
    assert!(decoder.dpb().is_empty());
}

#[test]
fn test_reset_and_drop_release_frames() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let slices = [SliceParams::idr(0), SliceParams::p(1), SliceParams::p(2)];

    let mut decoder = new_decoder(DecoderConfig::default());
    feed(&mut decoder, &stream(&sps, &pps, &slices));
    decoder.flush().unwrap();
    assert_eq!(decoder.backend().released_count(), 0, "参考帧在输出后仍保留");

    decoder.reset();
    assert!(decoder.dpb().is_empty());
    assert_eq!(decoder.backend().released_count(), 3);

    // 参数集在复位后保留
    feed(&mut decoder, &[slice_nal(&sps, &pps, &SliceParams::idr(0))]);
    decoder.flush().unwrap();
    let released = Rc::clone(&decoder.backend().released);
    drop(decoder);
    assert_eq!(released.borrow().len(), 4, "每一帧恰好释放一次");
}

#[test]
fn test_into_backend_releases_frames() {
    let sps = SpsParams::default();
    let pps = PpsParams::default();
    let mut decoder = new_decoder(DecoderConfig::default());
    feed(&mut decoder, &stream(&sps, &pps, &[SliceParams::idr(0), SliceParams::p(1)]));

    let backend = decoder.into_backend();
    assert_eq!(backend.submitted.len(), 1);
    assert_eq!(backend.released_count(), 1);
}
