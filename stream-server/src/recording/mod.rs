// 实验数据集管理
//
// 将握手中的实验名称解析为录制文件，加载并缓存为共享数据集。

pub mod catalog;
pub mod scanner;

pub use catalog::DatasetCatalog;
pub use scanner::{ExperimentInfo, ExperimentScanner};
