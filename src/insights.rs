//! LLM insight narration
//!
//! Second-pass LLM call that narrates a query result into
//! `{summary, key_insights, trends, anomalies, recommendations}`.
//!
//! The response is parsed by an ordered chain of pure parser strategies
//! ([`PARSERS`]): direct JSON, fenced ```json block, brace span,
//! keyword-sectioned lines, and finally sentence-level keyword heuristics.
//! When every strategy fails, or the surviving value is missing required
//! fields, the error propagates to the caller — insight generation never
//! substitutes canned text.

use crate::error::{DataProxyError, Result};
use crate::executor::Record;
use crate::llm::{CallOptions, LlmClient};
use crate::statistics;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insights {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub anomalies: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Insights {
    /// Minimum shape a parser must produce to win the cascade.
    fn is_plausible(&self) -> bool {
        !self.summary.is_empty()
    }
}

/// Ordered parser strategies, tried until one yields a plausible value.
pub const PARSERS: &[fn(&str) -> Option<Insights>] = &[
    parse_direct_json,
    parse_fenced_json,
    parse_brace_span,
    parse_keyword_lines,
    parse_sentence_heuristics,
];

/// Generate insights for a query result. Errors propagate.
pub async fn generate_insights(
    llm: &LlmClient,
    query: &str,
    data: &[Record],
    sql: Option<&str>,
) -> Result<Insights> {
    if data.is_empty() {
        return Err(DataProxyError::Insight(
            "查询未返回数据，无法生成洞察分析".to_string(),
        ));
    }

    let prompt = build_insights_prompt(query, data, sql);
    let response = llm.call(&prompt, &CallOptions::insight_generation()).await?;

    let insights = parse_response(&response)?;
    validate(insights)
}

/// Run the parser cascade over a raw LLM response.
pub fn parse_response(response: &str) -> Result<Insights> {
    for parser in PARSERS {
        if let Some(insights) = parser(response) {
            debug!("insight parser succeeded");
            return Ok(insights);
        }
    }

    warn!("all insight parser strategies failed");
    Err(DataProxyError::Insight(
        "无法从LLM响应中提取有效的洞察内容".to_string(),
    ))
}

/// Required fields must be present; otherwise the whole request fails.
fn validate(insights: Insights) -> Result<Insights> {
    if insights.summary.is_empty() {
        return Err(DataProxyError::Insight("LLM未生成摘要内容".to_string()));
    }
    if insights.key_insights.is_empty() {
        return Err(DataProxyError::Insight("LLM未生成key_insights内容".to_string()));
    }
    if insights.recommendations.is_empty() {
        return Err(DataProxyError::Insight(
            "LLM未生成recommendations内容".to_string(),
        ));
    }
    Ok(insights)
}

fn build_insights_prompt(query: &str, data: &[Record], sql: Option<&str>) -> String {
    let sql_info = sql
        .map(|s| format!("\n## 执行的SQL查询\n```sql\n{}\n```\n", s))
        .unwrap_or_default();

    format!(
        r#"你是一位资深的银行业务数据分析师，请基于以下实际查询结果数据，生成深度的业务洞察分析。

## 用户查询
{}

## 查询结果数据
{}
{}
## 分析要求
1. 数据驱动：所有洞察必须基于实际数据内容，不能是泛泛而谈
2. 业务相关：结合银行业务背景，提供专业的业务解读
3. 具体量化：尽可能提供具体的数字和比例
4. 实用性强：提供可操作的业务建议

## 输出格式要求
必须严格按照以下JSON格式返回，不要添加任何其他文字说明：

```json
{{
  "summary": "基于实际数据的简洁摘要",
  "key_insights": ["基于数据的关键发现"],
  "trends": ["从数据中识别的趋势"],
  "anomalies": ["数据中发现的异常或风险点"],
  "recommendations": ["基于数据分析的具体业务建议"]
}}
```

请开始分析："#,
        query,
        data_summary(data),
        sql_info
    )
}

/// Record count, columns, up to 3 sample rows and numeric stats.
fn data_summary(data: &[Record]) -> String {
    let mut parts = Vec::new();

    parts.push(format!("记录数: {}", data.len()));
    if let Some(first) = data.first() {
        let columns: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
        parts.push(format!("字段: {}", columns.join(", ")));
    }

    parts.push("数据样本:".to_string());
    for (i, record) in data.iter().take(3).enumerate() {
        let json = serde_json::to_string(record).unwrap_or_default();
        parts.push(format!("记录{}: {}", i + 1, json));
    }
    if data.len() > 3 {
        parts.push(format!("... 还有 {} 条记录", data.len() - 3));
    }

    let stats = statistics::compute(data);
    if !stats.numeric_summary.is_empty() {
        parts.push("数值字段统计:".to_string());
        for (field, s) in &stats.numeric_summary {
            parts.push(format!(
                "  {}: 最小值={}, 最大值={}, 平均值={:.2}",
                field, s.min, s.max, s.mean
            ));
        }
    }

    parts.join("\n")
}

fn parse_direct_json(response: &str) -> Option<Insights> {
    let insights: Insights = serde_json::from_str(response.trim()).ok()?;
    insights.is_plausible().then_some(insights)
}

fn parse_fenced_json(response: &str) -> Option<Insights> {
    let fence_start = response.find("```json")?;
    let json_start = response[fence_start..].find('{')? + fence_start;
    let fence_end = response[json_start..].find("```")? + json_start;

    let insights: Insights = serde_json::from_str(response[json_start..fence_end].trim()).ok()?;
    insights.is_plausible().then_some(insights)
}

fn parse_brace_span(response: &str) -> Option<Insights> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }

    let insights: Insights = serde_json::from_str(&response[start..=end]).ok()?;
    insights.is_plausible().then_some(insights)
}

/// Section-header keyword parse over plain text lines.
fn parse_keyword_lines(response: &str) -> Option<Insights> {
    let mut insights = Insights::default();
    let mut current_section: Option<&str> = None;

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(section) = section_for(line) {
            current_section = Some(section);
            if section == "summary" {
                if let Some(content) = content_after_separator(line) {
                    insights.summary = content;
                }
            }
            continue;
        }

        let Some(section) = current_section else { continue };
        let content = clean_list_item(line);
        if content.is_empty() {
            continue;
        }

        match section {
            "summary" => {
                if insights.summary.is_empty() {
                    insights.summary = content;
                }
            }
            "key_insights" => insights.key_insights.push(content),
            "trends" => insights.trends.push(content),
            "anomalies" => insights.anomalies.push(content),
            "recommendations" => insights.recommendations.push(content),
            _ => {}
        }
    }

    insights.is_plausible().then_some(insights)
}

fn section_for(line: &str) -> Option<&'static str> {
    let lower = line.to_lowercase();
    if ["摘要", "summary", "总结", "概述"].iter().any(|k| lower.contains(k)) {
        Some("summary")
    } else if ["关键洞察", "key_insights", "洞察", "关键发现"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("key_insights")
    } else if ["趋势", "trends"].iter().any(|k| lower.contains(k)) {
        Some("trends")
    } else if ["异常", "anomalies", "风险点"].iter().any(|k| lower.contains(k)) {
        Some("anomalies")
    } else if ["建议", "recommendations", "对策"].iter().any(|k| lower.contains(k)) {
        Some("recommendations")
    } else {
        None
    }
}

fn content_after_separator(line: &str) -> Option<String> {
    for separator in ['：', ':'] {
        if let Some((_, content)) = line.split_once(separator) {
            let content = content.trim();
            if content.chars().count() > 5 {
                return Some(content.to_string());
            }
        }
    }
    None
}

fn clean_list_item(line: &str) -> String {
    let mut item = line.trim();
    for prefix in ["-", "•", "*", "①", "②", "③", "④", "⑤"] {
        if let Some(stripped) = item.strip_prefix(prefix) {
            item = stripped.trim();
            break;
        }
    }
    // numbered list markers like "1." / "2."
    if let Some((marker, rest)) = item.split_once('.') {
        if marker.chars().all(|c| c.is_ascii_digit()) && !marker.is_empty() {
            item = rest.trim();
        }
    }

    let cleaned = item.trim_matches(|c| ",;，。；".contains(c)).trim();
    if cleaned.chars().count() > 5 {
        cleaned.to_string()
    } else {
        String::new()
    }
}

/// Last resort: pull banking-flavored sentences as findings and
/// action-flavored sentences as recommendations.
fn parse_sentence_heuristics(response: &str) -> Option<Insights> {
    const BANKING_KEYWORDS: [&str; 9] = [
        "贷款", "客户", "风险", "余额", "银行", "资产", "不良", "支行", "存款",
    ];
    const ACTIONABLE_KEYWORDS: [&str; 7] = ["建议", "应该", "需要", "立即", "加强", "优化", "建立"];

    let sentences: Vec<&str> = response
        .lines()
        .flat_map(|line| line.split('。'))
        .map(|s| s.trim())
        .filter(|s| {
            let n = s.chars().count();
            n > 15 && n < 200
        })
        .collect();

    let mut insights = Insights::default();
    for sentence in &sentences {
        if BANKING_KEYWORDS.iter().any(|k| sentence.contains(k)) {
            if insights.summary.is_empty() && sentence.chars().count() > 30 {
                insights.summary = format!("{}。", sentence);
            } else if insights.key_insights.len() < 3 {
                insights.key_insights.push(format!("{}。", sentence));
            }
        }
    }
    for sentence in &sentences {
        if ACTIONABLE_KEYWORDS.iter().any(|k| sentence.contains(k)) {
            insights.recommendations.push(format!("{}。", sentence));
        }
    }

    insights.is_plausible().then_some(insights)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_JSON: &str = r#"{
        "summary": "不良贷款集中在两家支行。",
        "key_insights": ["城东支行占比最高"],
        "trends": [],
        "anomalies": [],
        "recommendations": ["加强贷后检查"]
    }"#;

    #[test]
    fn direct_json_wins() {
        let insights = parse_response(VALID_JSON).unwrap();
        assert_eq!(insights.summary, "不良贷款集中在两家支行。");
    }

    #[test]
    fn fenced_json_is_extracted() {
        let response = format!("分析结果如下：\n```json\n{}\n```\n完毕。", VALID_JSON);
        let insights = parse_response(&response).unwrap();
        assert_eq!(insights.key_insights.len(), 1);
    }

    #[test]
    fn brace_span_survives_leading_text() {
        let response = format!("以下是JSON {}", VALID_JSON);
        let insights = parse_response(&response).unwrap();
        assert_eq!(insights.recommendations[0], "加强贷后检查");
    }

    #[test]
    fn keyword_lines_parse_plain_text() {
        let response = "摘要：整体不良贷款余额持续上升，需要重点关注。\n关键发现\n- 城东支行不良率显著高于平均水平\n建议\n- 对高风险支行开展专项排查工作";
        let insights = parse_response(response).unwrap();
        assert!(insights.summary.contains("不良贷款"));
        assert_eq!(insights.key_insights.len(), 1);
        assert_eq!(insights.recommendations.len(), 1);
    }

    #[test]
    fn sentence_heuristics_as_last_resort() {
        let response = "从本季度的数据来看，全行对公客户的各项贷款余额整体保持稳定增长态势，资产质量总体可控。监管方面建议加强对大额贷款的贷后管理工作。";
        let insights = parse_response(response).unwrap();
        assert!(!insights.summary.is_empty());
        assert!(!insights.recommendations.is_empty());
    }

    #[test]
    fn unparseable_response_is_an_error() {
        assert!(parse_response("ok").is_err());
    }

    #[test]
    fn validation_requires_recommendations() {
        let insights = Insights {
            summary: "有摘要".to_string(),
            key_insights: vec!["发现".to_string()],
            ..Default::default()
        };
        assert!(validate(insights).is_err());
    }

    #[tokio::test]
    async fn empty_data_is_an_error() {
        let llm = LlmClient::new(
            "dummy-api-key".to_string(),
            "deepseek-chat".to_string(),
            "https://api.deepseek.com".to_string(),
        );
        assert!(generate_insights(&llm, "统计", &[], None).await.is_err());
    }

    #[tokio::test]
    async fn dummy_llm_round_trip() {
        let llm = LlmClient::new(
            "dummy-api-key".to_string(),
            "deepseek-chat".to_string(),
            "https://api.deepseek.com".to_string(),
        );
        let mut record = Record::new();
        record.insert("balance".to_string(), serde_json::json!(1000));
        let insights = generate_insights(&llm, "统计余额", &[record], Some("SELECT 1;"))
            .await
            .unwrap();
        assert!(!insights.summary.is_empty());
        assert!(!insights.recommendations.is_empty());
    }
}
