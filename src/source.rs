//! 階層型の設定ソース。
//!
//! キーは `:` 区切り（例: `Producer:Orders:Topic`）で、大文字小文字を区別せずに照合する。

use std::collections::BTreeMap;

use crate::error::EasyKafkaError;

/// キー階層の区切り文字。
pub const KEY_DELIMITER: &str = ":";

/// ConfigSource は `:` 区切りキーで値を引ける階層型設定のインターフェース。
pub trait ConfigSource: Send + Sync {
    /// キーに対応する値を返す。存在しない場合は None。
    fn get(&self, key: &str) -> Option<String>;

    /// `prefix:` 配下のすべてのキーを、prefix を除いた相対キーで返す。
    fn section(&self, prefix: &str) -> BTreeMap<String, String>;
}

/// MemoryConfigSource はメモリ上のキー・値で構成される ConfigSource 実装。
///
/// YAML ファイルや環境変数から構築でき、後から読み込んだ値が先の値を上書きする。
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    entries: BTreeMap<String, String>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// キーと値を追加したソースを返す（ビルダー形式）。
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// キーと値を追加する。大文字小文字のみ異なる既存キーは置き換えられる。
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        self.entries.insert(key, value.into());
    }

    /// キーを削除する。
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|k, _| !k.eq_ignore_ascii_case(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// YAML 文字列からソースを構築する。ネストしたマッピングは `:` 区切りのキーに展開される。
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EasyKafkaError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let mut source = Self::new();
        flatten_yaml(&value, None, &mut source);
        Ok(source)
    }

    /// YAML ファイルを読み込む。env_path があればベースにマージしてから展開する。
    pub fn load(base_path: &str, env_path: Option<&str>) -> Result<Self, EasyKafkaError> {
        let base = std::fs::read_to_string(base_path)?;
        let mut value: serde_yaml::Value = serde_yaml::from_str(&base)?;

        if let Some(env) = env_path {
            let env_data = std::fs::read_to_string(env)?;
            let overlay: serde_yaml::Value = serde_yaml::from_str(&env_data)?;
            merge_yaml(&mut value, &overlay);
        }

        let mut source = Self::new();
        flatten_yaml(&value, None, &mut source);
        Ok(source)
    }

    /// プロセスの環境変数のうち prefix で始まるものを上書きとして取り込む。
    pub fn merge_env(self, prefix: &str) -> Self {
        self.merge_vars(std::env::vars(), prefix)
    }

    /// 変数列のうち prefix で始まるものを取り込む。
    ///
    /// `__` は階層区切りとして扱う（例: `EASYKAFKA_Producer__Orders__Topic` → `Producer:Orders:Topic`）。
    pub fn merge_vars<I, K, V>(mut self, vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            let name = name.as_ref();
            if let Some(stripped) = name.strip_prefix(prefix) {
                if stripped.is_empty() {
                    continue;
                }
                self.insert(stripped.replace("__", KEY_DELIMITER), value);
            }
        }
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryConfigSource {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut source = Self::new();
        for (key, value) in iter {
            source.insert(key, value);
        }
        source
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.entries.get(key) {
            return Some(value.clone());
        }
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    }

    fn section(&self, prefix: &str) -> BTreeMap<String, String> {
        let prefix = format!("{}{}", prefix.trim_end_matches(KEY_DELIMITER), KEY_DELIMITER);
        self.entries
            .iter()
            .filter_map(|(k, v)| {
                let head = k.get(..prefix.len())?;
                if !head.eq_ignore_ascii_case(&prefix) {
                    return None;
                }
                let relative = &k[prefix.len()..];
                (!relative.is_empty()).then(|| (relative.to_string(), v.clone()))
            })
            .collect()
    }
}

/// base YAML Value に overlay YAML Value を再帰的にマージする。
pub fn merge_yaml(base: &mut serde_yaml::Value, overlay: &serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(base_value) = base_map.get_mut(key) {
                    merge_yaml(base_value, value);
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn flatten_yaml(value: &serde_yaml::Value, path: Option<&str>, out: &mut MemoryConfigSource) {
    use serde_yaml::Value;

    let child_path = |segment: &str| match path {
        Some(p) => format!("{p}{KEY_DELIMITER}{segment}"),
        None => segment.to_string(),
    };

    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(segment) = scalar_to_string(k) {
                    flatten_yaml(v, Some(&child_path(&segment)), out);
                }
            }
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_yaml(v, Some(&child_path(&i.to_string())), out);
            }
        }
        Value::Tagged(tagged) => flatten_yaml(&tagged.value, path, out),
        scalar => {
            if let (Some(p), Some(s)) = (path, scalar_to_string(scalar)) {
                out.insert(p, s);
            }
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
