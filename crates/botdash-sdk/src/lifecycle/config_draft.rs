//! 配置草稿
//!
//! 保存配置时只提交非空字段：留空表示"保留服务器上的现有值"，而不是清空。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 提交给 `POST /save_config` 的请求体
pub type ConfigPayload = BTreeMap<String, String>;

/// 已知的 Bot 配置字段
pub mod fields {
    pub const FT_USERNAME: &str = "FT_USERNAME";
    pub const FT_PASSWORD: &str = "FT_PASSWORD";
    pub const JOGO_SLUG: &str = "JOGO_SLUG";
    pub const TARGET_SECTOR_SLUG: &str = "TARGET_SECTOR_SLUG";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const TWOCAPTCHA_API_KEY: &str = "TWOCAPTCHA_API_KEY";

    /// 表单中出现的全部字段
    pub const ALL: [&str; 6] = [
        FT_USERNAME,
        FT_PASSWORD,
        JOGO_SLUG,
        TARGET_SECTOR_SLUG,
        OPENAI_API_KEY,
        TWOCAPTCHA_API_KEY,
    ];
}

/// 用户输入的配置草稿（字段名 → 值）
///
/// 字段名统一转为大写，与服务器写入 `.env` 的格式一致。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDraft {
    fields: BTreeMap<String, String>,
}

impl ConfigDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置字段（链式）
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.fields.insert(key.as_ref().to_uppercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(&key.to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 生成提交用的请求体，去掉值为空字符串的字段
    pub fn to_payload(&self) -> ConfigPayload {
        self.fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigDraft
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut draft = ConfigDraft::new();
        for (key, value) in iter {
            draft.set(key, value);
        }
        draft
    }
}

#[cfg(test)]
mod tests {
    use super::fields::*;
    use super::*;

    #[test]
    fn test_empty_fields_are_omitted() {
        let draft = ConfigDraft::new().with(FT_USERNAME, "").with(JOGO_SLUG, "abc");
        let payload = draft.to_payload();

        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get(JOGO_SLUG).map(String::as_str), Some("abc"));
        assert!(!payload.contains_key(FT_USERNAME));
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"JOGO_SLUG":"abc"}"#
        );
    }

    #[test]
    fn test_keys_are_uppercased() {
        let draft: ConfigDraft = vec![("openai_api_key", "sk-1"), ("Custom_Flag", "on")]
            .into_iter()
            .collect();
        assert_eq!(draft.get(OPENAI_API_KEY), Some("sk-1"));
        assert_eq!(draft.get("custom_flag"), Some("on"));
        assert_eq!(draft.to_payload().keys().cloned().collect::<Vec<_>>(), vec![
            "CUSTOM_FLAG".to_string(),
            "OPENAI_API_KEY".to_string(),
        ]);
    }

    #[test]
    fn test_all_empty_draft_submits_nothing() {
        let draft: ConfigDraft = fields::ALL.iter().map(|k| (*k, "")).collect();
        assert_eq!(draft.len(), 6);
        assert!(draft.to_payload().is_empty());
    }
}
