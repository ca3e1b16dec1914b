use std::collections::HashMap;

/// Operator-facing strings. Script output is never routed through here.
pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        let mut en = HashMap::new();
        // Flash messages
        en.insert("flash_unauthorized".to_string(), "Access denied: administrator session required".to_string());
        en.insert("flash_invalid_input".to_string(), "Invalid value for '{0}': {1}".to_string());
        en.insert("flash_unknown_operation".to_string(), "Internal error: this action is not available".to_string());
        en.insert("flash_timeout".to_string(), "Operation timed out after {0}s and was stopped; the system may be partially changed, please check it".to_string());
        en.insert("flash_fault".to_string(), "Operation could not be started".to_string());

        // CLI output
        en.insert("ops_operation".to_string(), "OPERATION".to_string());
        en.insert("ops_script".to_string(), "SCRIPT".to_string());
        en.insert("ops_params".to_string(), "PARAMS".to_string());
        en.insert("ops_page".to_string(), "DEFAULT PAGE".to_string());
        en.insert("did_you_mean".to_string(), "Unknown operation '{0}'. Did you mean: {1}?".to_string());
        en.insert("unknown_operation".to_string(), "Unknown operation '{0}'".to_string());
        en.insert("explain_command".to_string(), "Command line:".to_string());
        en.insert("explain_literal".to_string(), "Every argument is a single literal word ({0} arguments)".to_string());
        en.insert("explain_not_literal".to_string(), "Command line does not parse as one literal command".to_string());
        en.insert("explain_idle".to_string(), "No '{0}' given: nothing would run".to_string());
        en.insert("explain_rejected".to_string(), "Request would be rejected: {0}".to_string());
        en.insert("audit_none".to_string(), "No audit records found in {0}".to_string());
        en.insert("audit_pruned".to_string(), "Archived {0} audit records".to_string());
        en.insert("audit_write_failed".to_string(), "Audit record could not be written".to_string());

        let mut zh = HashMap::new();
        zh.insert("flash_unauthorized".to_string(), "拒绝访问：需要管理员会话".to_string());
        zh.insert("flash_invalid_input".to_string(), "参数 '{0}' 的值无效：{1}".to_string());
        zh.insert("flash_unknown_operation".to_string(), "内部错误：该操作不可用".to_string());
        zh.insert("flash_timeout".to_string(), "操作在 {0} 秒后超时并已终止，系统可能已被部分修改，请检查".to_string());
        zh.insert("flash_fault".to_string(), "无法启动操作".to_string());

        zh.insert("ops_operation".to_string(), "操作".to_string());
        zh.insert("ops_script".to_string(), "脚本".to_string());
        zh.insert("ops_params".to_string(), "参数".to_string());
        zh.insert("ops_page".to_string(), "默认页面".to_string());
        zh.insert("did_you_mean".to_string(), "未知操作 '{0}'。您是否想要：{1}？".to_string());
        zh.insert("unknown_operation".to_string(), "未知操作 '{0}'".to_string());
        zh.insert("explain_command".to_string(), "命令行：".to_string());
        zh.insert("explain_literal".to_string(), "每个参数都是单个字面量（共 {0} 个参数）".to_string());
        zh.insert("explain_not_literal".to_string(), "命令行无法解析为单个字面量命令".to_string());
        zh.insert("explain_idle".to_string(), "未提供 '{0}'：不会执行任何操作".to_string());
        zh.insert("explain_rejected".to_string(), "请求将被拒绝：{0}".to_string());
        zh.insert("audit_none".to_string(), "在 {0} 中未找到审计记录".to_string());
        zh.insert("audit_pruned".to_string(), "已归档 {0} 条审计记录".to_string());
        zh.insert("audit_write_failed".to_string(), "无法写入审计记录".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        let effective_lang = if lang.starts_with("zh") || lang == "cn" || lang == "chinese" {
            "zh"
        } else {
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let mut result = self.t(key);
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}
