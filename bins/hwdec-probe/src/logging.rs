//! 日志初始化.
//!
//! 解析库通过 `log` 门面输出, 这里安装 tracing 订阅器并桥接 `log` 记录:
//! - stderr: 彩色, 默认 warn, `-v` 逐级提升 (stdout 留给探测报告)
//! - 文件: 无色, 默认 debug, 可由 HWDEC_LOG 环境变量覆盖
//!
//! 日志文件写入 `{dir}/{prefix}.{date}.log`.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use chrono::{Datelike, Local, Timelike};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 日志过滤环境变量
pub const LOG_ENV: &str = "HWDEC_LOG";

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// stderr 日志级别: 0=warn, 1=info, 2=debug, 3+=trace
pub fn console_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// 初始化日志系统
///
/// `quiet` 时 stderr 只保留错误.
pub fn init(dir: &Path, file_prefix: &str, verbosity: u8, quiet: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("创建日志目录失败: {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(file_prefix)
        .filename_suffix("log")
        .build(dir)
        .context("创建日志文件失败")?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let console_filter = EnvFilter::new(if quiet { "error" } else { console_level(verbosity) });
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(LineFormatter {
            ansi: true,
            with_target: false,
        })
        .with_filter(console_filter);

    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter {
            ansi: false,
            with_target: true,
        })
        .with_filter(file_filter);

    // 默认启用的 tracing-log 特性会同时安装 log -> tracing 桥接
    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装日志订阅器失败")?;
    Ok(())
}

/// 单行日志格式: 时间戳 + 级别 (+ target) + 消息
struct LineFormatter {
    /// 终端输出时为级别着色
    ansi: bool,
    /// 附带 target (log 记录为模块路径)
    with_target: bool,
}

fn level_color(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::ERROR => "\x1b[31m",
        tracing::Level::WARN => "\x1b[33m",
        tracing::Level::INFO => "\x1b[32m",
        _ => "\x1b[34m",
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
        )?;
        if self.ansi {
            write!(writer, "{}{:5}\x1b[0m", level_color(*meta.level()), meta.level())?;
        } else {
            write!(writer, "{:5}", meta.level())?;
        }
        if self.with_target {
            write!(writer, " {}", meta.target())?;
        }
        write!(writer, " > ")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
