//! 仓库内路径到 URL 的转义
//!
//! 文件路径会被插进 REST 路径段和 `path=` 查询参数；`?`/`#` 这类字符
//! 不转义会把 URL 截断到查询/片段上，请求打到错误的文件。路径按段
//! 转义，`/` 保留为分隔符。

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// 路径段内需要转义的字符
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// 查询参数值内需要转义的字符
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=');

/// 按段转义仓库内路径，`/` 保持原样
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// 转义单个查询参数值（路径作为 `path=` 参数传递时使用）
pub(crate) fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}
