//! 统一 diff 的按文件切分
//!
//! 扫描 `diff --git a/… b/…` 头部行，把整段 diff 切成每文件一个片段，
//! 以 `b/` 侧路径作为文件身份。切分保持精确的块边界：任何一行只属于
//! 一个文件的片段。

use super::model::FileDiff;

/// 把统一 diff 文本切成按文件的片段
pub fn split_unified_diff(diff: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<(String, String, Vec<&str>)> = None;

    for line in diff.lines() {
        if let Some((old_path, new_path)) = parse_header(line) {
            if let Some((old, new, lines)) = current.take() {
                files.push(FileDiff {
                    old_path: old,
                    new_path: new,
                    diff: lines.join("\n"),
                });
            }
            current = Some((old_path, new_path, vec![line]));
        } else if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        }
        // 头部之前的行（如 PR 摘要）不属于任何文件，丢弃
    }

    if let Some((old, new, lines)) = current {
        files.push(FileDiff {
            old_path: old,
            new_path: new,
            diff: lines.join("\n"),
        });
    }

    files
}

/// 解析 `diff --git a/X b/Y` 行；路径可能含空格，取第一个 ` b/` 作分界
fn parse_header(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("diff --git a/")?;
    let (old_path, new_path) = rest.split_once(" b/")?;
    Some((old_path.to_string(), new_path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
diff --git a/values.yaml b/values.yaml
index 1111111..2222222 100644
--- a/values.yaml
+++ b/values.yaml
@@ -1,2 +1,2 @@
-replicas: 1
+replicas: 3
 image: nginx
diff --git a/templates/svc.yaml b/templates/svc.yaml
new file mode 100644
index 0000000..3333333
--- /dev/null
+++ b/templates/svc.yaml
@@ -0,0 +1,2 @@
+kind: Service
+apiVersion: v1";

    #[test]
    fn test_splits_per_file_with_b_path_identity() {
        let files = split_unified_diff(SAMPLE);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].new_path, "values.yaml");
        assert_eq!(files[1].new_path, "templates/svc.yaml");
    }

    #[test]
    fn test_hunk_boundaries_are_exact() {
        let files = split_unified_diff(SAMPLE);
        // 每一行只属于一个片段
        assert!(files[0].diff.contains("+replicas: 3"));
        assert!(!files[0].diff.contains("kind: Service"));
        assert!(files[1].diff.contains("+kind: Service"));
        assert!(!files[1].diff.contains("replicas"));
        // 片段保留自己的头部行
        assert!(files[1].diff.starts_with("diff --git a/templates/svc.yaml"));
    }

    #[test]
    fn test_renamed_file_keeps_both_paths() {
        let diff = "diff --git a/old.yaml b/new.yaml\nsimilarity index 100%\nrename from old.yaml\nrename to new.yaml";
        let files = split_unified_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].old_path, "old.yaml");
        assert_eq!(files[0].new_path, "new.yaml");
    }

    #[test]
    fn test_empty_and_headerless_input() {
        assert!(split_unified_diff("").is_empty());
        assert!(split_unified_diff("no diff here\njust text").is_empty());
    }

    #[test]
    fn test_path_with_spaces() {
        let diff = "diff --git a/my chart/values.yaml b/my chart/values.yaml\n@@ -1 +1 @@\n-a\n+b";
        let files = split_unified_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].new_path, "my chart/values.yaml");
    }
}
