//! hwdec-probe - H.264 基本流探测工具
//!
//! 解析 Annex B 字节流 (或 avcC 配置 + 长度前缀样本), 驱动完整的解码前端
//! 对接一个空后端, 输出码流参数, 解码统计与图像的显示顺序.

mod backend;
mod logging;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use hwdec_codec::hwaccel::h264::MAX_DPB_SIZE;
use hwdec_codec::{DecoderConfig, DecoderStats, H264HwDecoder};
use log::info;
use serde::Serialize;

use backend::{NullBackend, OutputFrame, StreamInfo};

#[derive(Parser, Debug)]
#[command(name = "hwdec-probe", version, about = "H.264 基本流探测与 DPB 输出顺序分析")]
struct Cli {
    /// 输入文件 (Annex B 字节流, 指定 --avcc 时为长度前缀样本)
    input: Option<PathBuf>,

    /// MP4 avcC 配置记录文件
    #[arg(long)]
    avcc: Option<PathBuf>,

    /// DPB 容量 (1..=16)
    #[arg(long, default_value_t = MAX_DPB_SIZE)]
    dpb_size: usize,

    /// IDR 时不先输出之前的图像
    #[arg(long)]
    no_drain_on_idr: bool,

    /// 不合并互补场
    #[arg(long)]
    no_pair_fields: bool,

    /// 列出每一帧的输出顺序
    #[arg(long)]
    show_frames: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 日志目录
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// 静默模式 (只输出探测结果)
    #[arg(short, long)]
    quiet: bool,

    /// 日志级别 (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig::default()
            .with_dpb_size(self.dpb_size)
            .with_drain_on_idr(!self.no_drain_on_idr)
            .with_pair_fields(!self.no_pair_fields)
    }
}

// ============================================================
// 输出结构体
// ============================================================

/// 完整探测结果
#[derive(Debug, Serialize)]
struct ProbeReport {
    filename: String,
    input_format: &'static str,
    dpb_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<StreamInfo>,
    sps_changes: u32,
    stats: StatsReport,
    field_pictures: u64,
    /// 解码结束后仍未归还的帧
    leaked_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<OutputFrame>>,
}

/// 解码统计
#[derive(Debug, Serialize, PartialEq, Eq)]
struct StatsReport {
    nals: u64,
    slices: u64,
    access_units: u64,
    pictures_decoded: u64,
    pictures_output: u64,
    idr_pictures: u64,
    dropped_nals: u64,
    dropped_pictures: u64,
}

impl From<DecoderStats> for StatsReport {
    fn from(stats: DecoderStats) -> Self {
        Self {
            nals: stats.nals,
            slices: stats.slices,
            access_units: stats.access_units,
            pictures_decoded: stats.pictures_decoded,
            pictures_output: stats.pictures_output,
            idr_pictures: stats.idr_pictures,
            dropped_nals: stats.dropped_nals,
            dropped_pictures: stats.dropped_pictures,
        }
    }
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();

    let Some(input_path) = cli.input.as_deref() else {
        print_banner();
        return;
    };

    if let Err(e) = logging::init(&cli.log_dir, "hwdec-probe", cli.verbose, cli.quiet) {
        eprintln!("警告: {e:#}");
    }

    if !cli.quiet {
        eprintln!(
            "hwdec-probe 版本 {} -- H.264 解码前端探测工具",
            env!("CARGO_PKG_VERSION")
        );
        eprintln!("输入文件: {}", input_path.display());
    }

    let report = match probe_file(input_path, cli.avcc.as_deref(), cli.decoder_config()) {
        Ok(outcome) => outcome.into_report(input_path, cli.show_frames || cli.json),
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("错误: 序列化结果失败: {e}");
                process::exit(1);
            }
        }
    } else {
        print_report_text(&report);
    }
}

/// 一次探测的原始结果
struct ProbeOutcome {
    config: DecoderConfig,
    avcc: bool,
    stats: DecoderStats,
    backend: NullBackend,
}

impl ProbeOutcome {
    fn into_report(self, input_path: &Path, with_frames: bool) -> ProbeReport {
        ProbeReport {
            filename: input_path.display().to_string(),
            input_format: if self.avcc { "avcc" } else { "annexb" },
            dpb_size: self.config.effective_dpb_size(),
            stream: self.backend.stream.clone(),
            sps_changes: self.backend.sps_changes,
            stats: self.stats.into(),
            field_pictures: self.backend.field_pictures,
            leaked_frames: self.backend.live_frames(),
            frames: with_frames.then_some(self.backend.output),
        }
    }
}

/// 读取文件并探测
fn probe_file(
    input_path: &Path,
    avcc_path: Option<&Path>,
    config: DecoderConfig,
) -> anyhow::Result<ProbeOutcome> {
    let data = std::fs::read(input_path)
        .with_context(|| format!("无法读取输入文件 '{}'", input_path.display()))?;
    let avcc = match avcc_path {
        Some(path) => Some(Bytes::from(
            std::fs::read(path)
                .with_context(|| format!("无法读取 avcC 配置 '{}'", path.display()))?,
        )),
        None => None,
    };
    probe(Bytes::from(data), avcc, config)
}

/// 将整段码流送入解码前端, 结束时冲刷 DPB 并释放全部帧
fn probe(
    data: Bytes,
    avcc: Option<Bytes>,
    config: DecoderConfig,
) -> anyhow::Result<ProbeOutcome> {
    let mut decoder = H264HwDecoder::new(NullBackend::new(), config.clone());
    let is_avcc = avcc.is_some();
    if let Some(avcc) = &avcc {
        decoder.load_avcc_config(avcc).context("avcC 配置无效")?;
    }
    decoder.decode_packet(&data).context("解码失败")?;
    decoder.flush().context("冲刷 DPB 失败")?;

    let stats = decoder.stats();
    info!(
        "探测完成: access_units={}, decoded={}, output={}, dropped_pictures={}",
        stats.access_units, stats.pictures_decoded, stats.pictures_output, stats.dropped_pictures
    );
    Ok(ProbeOutcome {
        config,
        avcc: is_avcc,
        stats,
        backend: decoder.into_backend(),
    })
}

/// 文本输出
fn print_report_text(report: &ProbeReport) {
    println!("[INPUT]");
    println!("  文件名       : {}", report.filename);
    println!("  封装         : {}", report.input_format);
    println!("  DPB 容量     : {}", report.dpb_size);
    println!("[/INPUT]");
    println!();

    if let Some(ref stream) = report.stream {
        println!("[STREAM]");
        println!("  profile/level: {}/{}", stream.profile_idc, stream.level_idc);
        println!("  编码尺寸     : {}x{}", stream.width, stream.height);
        println!("  显示尺寸     : {}x{}", stream.display_width, stream.display_height);
        println!("  色度格式     : {}", stream.chroma_format_idc);
        println!("  位深         : {}", stream.bit_depth);
        println!("  POC 类型     : {}", stream.poc_type);
        println!("  参考帧数     : {}", stream.max_num_ref_frames);
        println!("  逐行         : {}", stream.frame_mbs_only);
        if let Some(buffering) = stream.max_dec_frame_buffering {
            println!("  解码缓冲     : {buffering}");
        }
        if report.sps_changes > 0 {
            println!("  SPS 变更     : {}", report.sps_changes);
        }
        println!("[/STREAM]");
        println!();
    }

    let stats = &report.stats;
    println!("[DECODE]");
    println!("  NAL 单元     : {} (丢弃 {})", stats.nals, stats.dropped_nals);
    println!("  切片         : {}", stats.slices);
    println!("  访问单元     : {}", stats.access_units);
    println!("  解码图像     : {} (场 {})", stats.pictures_decoded, report.field_pictures);
    println!("  IDR 图像     : {}", stats.idr_pictures);
    println!("  输出帧       : {}", stats.pictures_output);
    println!("  丢弃图像     : {}", stats.dropped_pictures);
    if report.leaked_frames > 0 {
        println!("  未释放帧     : {}", report.leaked_frames);
    }
    println!("[/DECODE]");
    println!();

    if let Some(ref frames) = report.frames {
        println!("[FRAMES]");
        for (index, frame) in frames.iter().enumerate() {
            println!(
                "  #{index:<5} surface={:<4} frame_num={:<4} poc={:<6} foc={:?}{}{}",
                frame.surface,
                frame.frame_num,
                frame.poc,
                frame.field_order_cnt,
                if frame.idr { " IDR" } else { "" },
                if frame.complete { "" } else { " 单场" },
            );
        }
        println!("[/FRAMES]");
        println!();
    }
}

/// 打印版本横幅
fn print_banner() {
    println!(
        "hwdec-probe 版本 {} -- H.264 解码前端探测工具",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("用法: hwdec-probe [选项] <输入文件>");
    println!();
    println!("选项:");
    println!("  --avcc <文件>       输入为长度前缀样本, 参数集取自 avcC 配置");
    println!("  --dpb-size <N>      DPB 容量 (默认 16)");
    println!("  --no-drain-on-idr   IDR 时不先输出之前的图像");
    println!("  --no-pair-fields    不合并互补场");
    println!("  --show-frames       列出每一帧的输出顺序");
    println!("  --json              以 JSON 格式输出");
    println!("  -q, --quiet         静默模式");
    println!("  -v                  提升日志级别");
    println!();
    println!("使用 --help 查看完整用法.");
}
