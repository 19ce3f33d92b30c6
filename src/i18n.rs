//! UI string tables for the two supported languages.
//!
//! Lookup falls back to Chinese, then to the key itself, so a missing entry
//! degrades to something readable instead of an empty line.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    #[default]
    Zh,
    En,
}

impl Lang {
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        match code.trim().to_ascii_lowercase().as_str() {
            "zh" => Ok(Lang::Zh),
            "en" => Ok(Lang::En),
            other => Err(ValidationError::UnknownLanguage(other.to_string())),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

type Table = HashMap<&'static str, &'static str>;

static ZH: Lazy<Table> = Lazy::new(|| {
    HashMap::from([
        ("newChat", "新对话"),
        ("newChatStarted", "新对话已开始"),
        ("chatHistory", "历史记录"),
        ("noHistory", "暂无历史记录"),
        ("settings", "设置"),
        ("user", "用户"),
        ("aiAssistant", "AI助手"),
        ("selectModelFirst", "请先选择至少一个模型"),
        ("imageUploaded", "已上传图片：{name}"),
        ("connecting", "正在连接服务器..."),
        ("stopped", "⚠️ 生成已被用户停止"),
        ("errorPrefix", "错误: {message}"),
        ("viewDetails", "查看详情"),
        ("regenerate", "重新生成"),
        ("noDetails", "没有详细过程信息。"),
        ("initialAnswer", "初始回答"),
        ("revisedAnswer", "修改后回答"),
        ("critiquesReceived", "收到的评审"),
        ("totalScore", "总分"),
        ("critic", "评审员"),
        ("comment", "评语"),
        ("noCritiques", "没有收到有效的评审意见。"),
        ("accuracy", "准确性"),
        ("completeness", "完整性"),
        ("clarity", "清晰性"),
        ("usefulness", "实用性"),
        ("models", "模型"),
        ("vision", "视觉"),
        ("chatHints", "输入问题后回车发送；/details 查看详情，/regen 重新生成，/new 新对话，/quit 退出"),
        ("manageProviders", "管理服务商"),
        ("managePrompts", "管理提示词"),
        ("noProviders", "尚未配置服务商"),
        ("noPrompts", "暂无提示词"),
        ("active", "已激活"),
        ("delete", "删除"),
        ("activate", "激活"),
        ("deleteSuccess", "删除成功"),
        ("activateSuccess", "激活成功"),
        ("addSuccess", "添加成功"),
        ("updateSuccess", "更新成功"),
        ("uploadWallpaper", "上传壁纸"),
        ("resetWallpaper", "恢复默认"),
        ("searchResults", "约 {count} 条结果"),
        ("noResults", "没有找到结果"),
        ("suggestions", "相关建议"),
        ("ocrRecognized", "识别出的文字"),
        ("prompt", "> "),
    ])
});

static EN: Lazy<Table> = Lazy::new(|| {
    HashMap::from([
        ("newChat", "New Chat"),
        ("newChatStarted", "New chat started"),
        ("chatHistory", "History"),
        ("noHistory", "No history yet"),
        ("settings", "Settings"),
        ("user", "User"),
        ("aiAssistant", "AI Assistant"),
        ("selectModelFirst", "Please select at least one model first"),
        ("imageUploaded", "Image uploaded: {name}"),
        ("connecting", "Connecting to server..."),
        ("stopped", "⚠️ Generation stopped by user"),
        ("errorPrefix", "Error: {message}"),
        ("viewDetails", "View details"),
        ("regenerate", "Regenerate"),
        ("noDetails", "No process details."),
        ("initialAnswer", "Initial answer"),
        ("revisedAnswer", "Revised answer"),
        ("critiquesReceived", "Critiques received"),
        ("totalScore", "Total score"),
        ("critic", "Critic"),
        ("comment", "Comment"),
        ("noCritiques", "No valid critiques received."),
        ("accuracy", "Accuracy"),
        ("completeness", "Completeness"),
        ("clarity", "Clarity"),
        ("usefulness", "Usefulness"),
        ("models", "Models"),
        ("vision", "vision"),
        ("chatHints", "Type a question and press Enter; /details, /regen, /new, /quit"),
        ("manageProviders", "Manage Providers"),
        ("managePrompts", "Manage Prompts"),
        ("noProviders", "No providers configured"),
        ("noPrompts", "No prompt templates"),
        ("active", "active"),
        ("delete", "Delete"),
        ("activate", "Activate"),
        ("deleteSuccess", "Deleted successfully"),
        ("activateSuccess", "Activated successfully"),
        ("addSuccess", "Added successfully"),
        ("updateSuccess", "Updated successfully"),
        ("uploadWallpaper", "Upload Wallpaper"),
        ("resetWallpaper", "Reset Default"),
        ("searchResults", "About {count} results"),
        ("noResults", "No results found"),
        ("suggestions", "Suggestions"),
        ("ocrRecognized", "Recognized text"),
    ])
});

fn table(lang: Lang) -> &'static Table {
    match lang {
        Lang::Zh => &*ZH,
        Lang::En => &*EN,
    }
}

/// Look up `key` for `lang`.
pub fn t(lang: Lang, key: &str) -> String {
    table(lang)
        .get(key)
        .or_else(|| ZH.get(key))
        .map(|s| s.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Look up `key` and replace every `{name}` placeholder from `params`.
pub fn tf(lang: Lang, key: &str, params: &[(&str, &str)]) -> String {
    params.iter().fold(t(lang, key), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_per_language() {
        assert_eq!(t(Lang::En, "newChat"), "New Chat");
        assert_eq!(t(Lang::Zh, "newChat"), "新对话");
    }

    #[test]
    fn test_missing_english_falls_back_to_chinese() {
        assert_eq!(t(Lang::En, "prompt"), "> ");
    }

    #[test]
    fn test_unknown_key_returns_key() {
        assert_eq!(t(Lang::En, "no.such.key"), "no.such.key");
    }

    #[test]
    fn test_params_are_substituted_everywhere() {
        assert_eq!(
            tf(Lang::En, "errorPrefix", &[("message", "HTTP 500")]),
            "Error: HTTP 500"
        );
        assert_eq!(tf(Lang::Zh, "searchResults", &[("count", "42")]), "约 42 条结果");
    }

    #[test]
    fn test_lang_parse() {
        assert_eq!(Lang::parse("EN").expect("en"), Lang::En);
        assert_eq!(Lang::parse("zh").expect("zh"), Lang::Zh);
        assert!(Lang::parse("fr").is_err());
        assert_eq!(Lang::default().code(), "zh");
    }

    #[test]
    fn test_tables_have_same_keys_except_prompt() {
        for key in EN.keys() {
            assert!(ZH.contains_key(key), "zh missing {key}");
        }
    }
}
