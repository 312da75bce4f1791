//! RCA 批处理扫描入口.
//!
//! 全部运行参数来自环境变量 (见 `runner` 模块文档),
//! 进程退出码: 0 全部成功, 1 存在失败的受测对象, 2 配置错误.

mod report;
mod runner;

use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("logger init");

    std::process::exit(runner::run());
}
