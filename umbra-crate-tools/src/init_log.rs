use std::io::Write;

use env_logger::fmt::Formatter;

/// 默认以 Info 等级初始化日志
///
/// `RUST_LOG` 环境变量会覆盖默认等级
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

pub fn init_log_with_level(level: log::LevelFilter) {
    builder(level).init();
}

/// 测试中可能被多次调用，重复初始化时静默忽略
pub fn try_init_test_log() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}

fn builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(format_record).filter(None, level).parse_default_env();
    builder
}

fn format_record(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let level_style = match record.level() {
        log::Level::Info => buf
            .default_level_style(log::Level::Info)
            .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        log::Level::Warn => buf
            .default_level_style(log::Level::Warn)
            .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        log::Level::Error => buf
            .default_level_style(log::Level::Error)
            .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        level => buf.default_level_style(level),
    };
    let location_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    // windows 下的路径分隔符也需要处理
    let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
    let line = record.line().unwrap_or(0);
    let time = chrono::Local::now().format("%H:%M:%S%.3f");

    writeln!(
        buf,
        "{level_style}[{time}] {:<5}{level_style:#} {location_style}[{file}:{line}]{location_style:#} {}",
        record.level(),
        record.args()
    )
}
