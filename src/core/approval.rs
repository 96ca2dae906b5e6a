//! 工具审批闸门
//!
//! 按工具风险等级与审批模式决定一次工具调用能否直接执行：
//! - critical：除 yolo 外一律需要确认
//! - requires_confirmation：除 yolo 外一律需要确认
//! - 其余按模式：suggest 全部确认；auto_edit 放行 low；full_auto 放行 low/medium；yolo 全部放行
//!
//! 模式保存在 AtomicU8 中，decide 只读取一次，操作员并发切换模式时单次决策不会看到中间状态。
//! 无法识别的模式值一律要求确认。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具风险等级
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// 只读、信息查询
    Low,
    /// 写文件等可回滚修改
    Medium,
    /// 删除、执行命令等难以撤销的操作
    High,
    /// 系统级、外部副作用、不可逆
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// 审批模式（由操作员显式切换）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ApprovalMode {
    Suggest = 0,
    AutoEdit = 1,
    FullAuto = 2,
    Yolo = 3,
}

impl ApprovalMode {
    pub const ALL: [ApprovalMode; 4] = [
        ApprovalMode::Suggest,
        ApprovalMode::AutoEdit,
        ApprovalMode::FullAuto,
        ApprovalMode::Yolo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Suggest => "suggest",
            ApprovalMode::AutoEdit => "auto_edit",
            ApprovalMode::FullAuto => "full_auto",
            ApprovalMode::Yolo => "yolo",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ApprovalMode::Suggest => "All actions require approval",
            ApprovalMode::AutoEdit => "Low-risk actions auto-approved, others need approval",
            ApprovalMode::FullAuto => {
                "Low and medium-risk auto-approved, high-risk needs approval"
            }
            ApprovalMode::Yolo => "All actions auto-approved (dangerous!)",
        }
    }

    /// 循环切换：suggest -> auto_edit -> full_auto -> yolo -> suggest
    pub fn next(&self) -> ApprovalMode {
        match self {
            ApprovalMode::Suggest => ApprovalMode::AutoEdit,
            ApprovalMode::AutoEdit => ApprovalMode::FullAuto,
            ApprovalMode::FullAuto => ApprovalMode::Yolo,
            ApprovalMode::Yolo => ApprovalMode::Suggest,
        }
    }

    fn from_repr(raw: u8) -> Option<ApprovalMode> {
        ApprovalMode::ALL.into_iter().find(|m| *m as u8 == raw)
    }
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::AutoEdit
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "suggest" => Ok(ApprovalMode::Suggest),
            "auto_edit" => Ok(ApprovalMode::AutoEdit),
            "full_auto" => Ok(ApprovalMode::FullAuto),
            "yolo" => Ok(ApprovalMode::Yolo),
            other => Err(format!("unknown approval mode: {}", other)),
        }
    }
}

/// 单个工具的风险画像
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRiskProfile {
    #[serde(alias = "tool")]
    pub tool_name: String,
    pub risk: RiskLevel,
    #[serde(default)]
    pub description: String,
    /// 无论模式如何都要求确认（yolo 除外）
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ToolRiskProfile {
    pub fn new(tool_name: impl Into<String>, risk: RiskLevel, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            risk,
            description: description.into(),
            requires_confirmation: false,
        }
    }

    pub fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// 未登记工具的默认画像：medium
    pub fn unknown(tool_name: impl Into<String>) -> Self {
        Self::new(tool_name, RiskLevel::Medium, "Unknown tool")
    }

    /// 结合参数的实际风险；目前等于基础风险，参数感知的评估可在此扩展
    pub fn effective_risk(&self, _arguments: &Value) -> RiskLevel {
        self.risk
    }
}

/// 内置工具的默认风险画像
pub fn default_risk_profiles() -> HashMap<String, ToolRiskProfile> {
    use RiskLevel::*;
    [
        ("ls", Low, "List directory contents"),
        ("cat", Low, "Read file contents"),
        ("echo", Low, "Echo text"),
        ("get_project_structure", Low, "View project structure"),
        ("web_search", Low, "Search the web"),
        ("search_web", Low, "Search the web"),
        ("git_status", Low, "View git status"),
        ("git_diff", Low, "View git differences"),
        ("git_log", Low, "View git history"),
        ("git_branch", Low, "List git branches"),
        ("dns_lookup", Low, "DNS lookup"),
        ("whois_lookup", Low, "WHOIS lookup"),
        ("http_headers", Low, "Fetch HTTP headers"),
        ("write_file", Medium, "Create or modify files"),
        ("append_file", Medium, "Append to files"),
        ("git_commit", Medium, "Create git commits"),
        ("delete_file", High, "Delete files"),
        ("run_command", High, "Execute shell commands"),
        ("port_scan", High, "Scan network ports"),
    ]
    .into_iter()
    .map(|(name, risk, desc)| (name.to_string(), ToolRiskProfile::new(name, risk, desc)))
    .collect()
}

/// 一次审批决策
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub needs_approval: bool,
    pub risk: RiskLevel,
    pub reason: String,
}

impl ApprovalDecision {
    fn require(risk: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            needs_approval: true,
            risk,
            reason: reason.into(),
        }
    }

    fn allow(risk: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            needs_approval: false,
            risk,
            reason: reason.into(),
        }
    }
}

/// 纯函数决策表：(模式, 画像, 风险) -> 决策。mode 为 None 表示无法识别的模式值
pub fn evaluate(mode: Option<ApprovalMode>, profile: &ToolRiskProfile, risk: RiskLevel) -> ApprovalDecision {
    let Some(mode) = mode else {
        return ApprovalDecision::require(risk, "Unknown mode - requiring approval");
    };

    if risk == RiskLevel::Critical {
        if mode == ApprovalMode::Yolo {
            return ApprovalDecision::allow(risk, "YOLO mode - no approval needed");
        }
        return ApprovalDecision::require(risk, format!("Critical action: {}", profile.description));
    }

    if profile.requires_confirmation && mode != ApprovalMode::Yolo {
        return ApprovalDecision::require(
            risk,
            format!("Confirmation required: {}", profile.description),
        );
    }

    match mode {
        ApprovalMode::Suggest => {
            ApprovalDecision::require(risk, format!("Suggest mode: {}", profile.description))
        }
        ApprovalMode::AutoEdit => {
            if risk == RiskLevel::Low {
                ApprovalDecision::allow(risk, "Low risk - auto-approved")
            } else {
                ApprovalDecision::require(
                    risk,
                    format!("{} risk: {}", risk.title(), profile.description),
                )
            }
        }
        ApprovalMode::FullAuto => {
            if matches!(risk, RiskLevel::Low | RiskLevel::Medium) {
                ApprovalDecision::allow(risk, "Auto-approved in full-auto mode")
            } else {
                ApprovalDecision::require(risk, format!("High risk action: {}", profile.description))
            }
        }
        ApprovalMode::Yolo => ApprovalDecision::allow(risk, "YOLO mode - no approval needed"),
    }
}

/// 审批闸门：进程内共享（Arc<ApprovalGate>），显式传入 Agent
#[derive(Debug)]
pub struct ApprovalGate {
    mode: AtomicU8,
    profiles: RwLock<HashMap<String, ToolRiskProfile>>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(ApprovalMode::default())
    }
}

impl ApprovalGate {
    /// 以默认风险画像创建
    pub fn new(mode: ApprovalMode) -> Self {
        Self::with_profiles(mode, default_risk_profiles())
    }

    pub fn with_profiles(mode: ApprovalMode, profiles: HashMap<String, ToolRiskProfile>) -> Self {
        Self {
            mode: AtomicU8::new(mode as u8),
            profiles: RwLock::new(profiles),
        }
    }

    /// 当前模式；存储值无法识别时回落为 suggest（最严格）
    pub fn mode(&self) -> ApprovalMode {
        ApprovalMode::from_repr(self.mode.load(Ordering::Acquire)).unwrap_or(ApprovalMode::Suggest)
    }

    pub fn set_mode(&self, mode: ApprovalMode) {
        self.mode.store(mode as u8, Ordering::Release);
        tracing::info!(mode = %mode, "approval mode set");
    }

    /// 切换到下一个模式并返回
    pub fn toggle_mode(&self) -> ApprovalMode {
        let next = self.mode().next();
        self.set_mode(next);
        next
    }

    /// 登记或覆盖工具的风险画像
    pub fn register_risk_profile(&self, profile: ToolRiskProfile) {
        let mut profiles = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        profiles.insert(profile.tool_name.clone(), profile);
    }

    /// 工具的风险画像；未登记返回默认 medium
    pub fn risk_profile(&self, tool_name: &str) -> ToolRiskProfile {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        profiles
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| ToolRiskProfile::unknown(tool_name))
    }

    /// 判断一次工具调用是否需要确认
    pub fn decide(&self, tool_name: &str, arguments: &Value) -> ApprovalDecision {
        let mode = ApprovalMode::from_repr(self.mode.load(Ordering::Acquire));
        let profile = self.risk_profile(tool_name);
        let risk = profile.effective_risk(arguments);
        evaluate(mode, &profile, risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(risk: RiskLevel) -> ToolRiskProfile {
        ToolRiskProfile::new("t", risk, "test tool")
    }

    fn needs(mode: ApprovalMode, risk: RiskLevel) -> bool {
        evaluate(Some(mode), &profile(risk), risk).needs_approval
    }

    #[test]
    fn test_truth_table() {
        use ApprovalMode::*;
        use RiskLevel::*;
        for risk in [Low, Medium, High, Critical] {
            assert!(!needs(Yolo, risk), "yolo/{risk}");
            assert!(needs(Suggest, risk), "suggest/{risk}");
        }
        assert!(!needs(AutoEdit, Low));
        assert!(needs(AutoEdit, Medium));
        assert!(needs(AutoEdit, High));
        assert!(!needs(FullAuto, Low));
        assert!(!needs(FullAuto, Medium));
        assert!(needs(FullAuto, High));
        assert!(needs(FullAuto, Critical));
    }

    #[test]
    fn test_requires_confirmation_ignored_only_in_yolo() {
        let p = profile(RiskLevel::Low).with_confirmation();
        assert!(evaluate(Some(ApprovalMode::FullAuto), &p, RiskLevel::Low).needs_approval);
        assert!(evaluate(Some(ApprovalMode::AutoEdit), &p, RiskLevel::Low).needs_approval);
        assert!(!evaluate(Some(ApprovalMode::Yolo), &p, RiskLevel::Low).needs_approval);
    }

    #[test]
    fn test_unknown_mode_fails_closed() {
        let d = evaluate(None, &profile(RiskLevel::Low), RiskLevel::Low);
        assert!(d.needs_approval);
        assert_eq!(d.reason, "Unknown mode - requiring approval");
    }

    #[test]
    fn test_unknown_tool_defaults_to_medium() {
        let gate = ApprovalGate::new(ApprovalMode::AutoEdit);
        let d = gate.decide("mystery_tool", &json!({}));
        assert_eq!(d.risk, RiskLevel::Medium);
        assert!(d.needs_approval);
        assert!(d.reason.contains("Unknown tool"));

        gate.set_mode(ApprovalMode::FullAuto);
        assert!(!gate.decide("mystery_tool", &json!({})).needs_approval);
    }

    #[test]
    fn test_registered_profile_overrides_default() {
        let gate = ApprovalGate::new(ApprovalMode::FullAuto);
        assert!(!gate.decide("cat", &json!({})).needs_approval);

        gate.register_risk_profile(ToolRiskProfile::new("cat", RiskLevel::Critical, "Read secrets"));
        let d = gate.decide("cat", &json!({}));
        assert!(d.needs_approval);
        assert_eq!(d.reason, "Critical action: Read secrets");
    }

    #[test]
    fn test_mode_parse_and_toggle() {
        assert_eq!("auto-edit".parse::<ApprovalMode>().unwrap(), ApprovalMode::AutoEdit);
        assert_eq!("FULL_AUTO".parse::<ApprovalMode>().unwrap(), ApprovalMode::FullAuto);
        assert!("reckless".parse::<ApprovalMode>().is_err());

        let gate = ApprovalGate::new(ApprovalMode::Yolo);
        assert_eq!(gate.toggle_mode(), ApprovalMode::Suggest);
        assert_eq!(gate.mode(), ApprovalMode::Suggest);
    }
}
