/**
 * 压缩文件处理模块
 *
 * 读取 zip 容器的成员（`ZipBundleReader`），以及按记录顺序重新打包
 * （`ZipBundleWriter`）。zip 以外的格式按普通文件处理。
 */
pub mod zip_reader;
pub mod zip_writer;

pub use zip_reader::{ArchiveEntry, ZipBundleReader};
pub use zip_writer::ZipBundleWriter;

use crate::error::AppError;
use std::path::Path;

/// Recognized archive suffixes. Matching is exact and case-sensitive.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "skinzip"];

/**
 * 判断名称是否带有可识别的归档后缀
 */
pub fn is_archive_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
}

/// Zip directory naming rule: a trailing `/`, or `\` from Windows tools.
///
/// Matches what the zip crate itself reports as a directory entry.
pub fn is_directory_name(name: &str) -> bool {
    name.ends_with('/') || name.ends_with('\\')
}

/// Map a zip crate error onto the application taxonomy
pub(crate) fn map_zip_error(error: zip::result::ZipError, context: &str, path: Option<&Path>) -> AppError {
    match error {
        zip::result::ZipError::Io(e) => AppError::io_error(
            format!("{}: {}", context, e),
            path.map(Path::to_path_buf),
        ),
        other => AppError::archive_error(
            format!("{}: {}", context, other),
            path.map(Path::to_path_buf),
        ),
    }
}
