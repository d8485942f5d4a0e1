pub mod bundle;

// 重新导出核心类型
pub use bundle::{Bundle, BundleKind, Member};
