//! Prompt Assembler
//!
//! Concatenates schema text, business terms, field mappings and the user
//! query into one chat prompt. Two hand-written templates exist; the
//! complex one is selected when the query matches any of a handful of
//! multi-clause regex heuristics. Templates are plain data and can be
//! swapped per assembler instance.

use crate::error::{DataProxyError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    /// Multi-clause query shapes that get the complex template.
    static ref COMPLEX_INDICATORS: Vec<Regex> = vec![
        Regex::new("的.*的").unwrap(),
        Regex::new("统计.*并输出").unwrap(),
        Regex::new("截至.*末").unwrap(),
        Regex::new(".*余额.*客户.*名称").unwrap(),
        Regex::new("分析.*分布").unwrap(),
        Regex::new("各.*统计").unwrap(),
    ];
}

const PLACEHOLDERS: [&str; 5] = [
    "{schema_info}",
    "{business_terms}",
    "{field_mappings}",
    "{business_rules}",
    "{query}",
];

pub const SIMPLE_TEMPLATE: &str = r#"你是一个专业的银行数据分析师，需要将自然语言查询转换为准确的SQL语句。

数据库结构：
{schema_info}

业务术语定义：
{business_terms}

字段映射：
{field_mappings}

用户查询：{query}

重要说明：
- 请使用上面显示的真实表名，不要使用占位符如"your_table_name"
- 优先使用包含最多相关字段的表
- 对于业务术语，使用对应的SQL条件

重要的SQL语法规则：
- GROUP BY子句中不能使用聚合函数(SUM, COUNT, AVG等)
- 如需按聚合结果分组，应使用子查询或HAVING子句

请根据以上信息生成准确的SQL语句。注意：
1. 只返回SQL语句，不要包含任何解释或注释
2. 使用上面显示的真实表名和字段名
3. 确保SQL语法正确，特别注意GROUP BY规则
4. 如果需要计算，使用适当的聚合函数

SQL语句："#;

pub const COMPLEX_TEMPLATE: &str = r#"你是一个专业的银行数据分析师，需要将复杂的自然语言查询转换为准确的SQL语句。

数据库结构：
{schema_info}

业务术语定义：
{business_terms}

字段映射：
{field_mappings}

用户查询：{query}

重要的SQL语法规则：
- GROUP BY子句中不能使用聚合函数(SUM, COUNT, AVG等)
- 如需按聚合结果分组，应使用子查询或HAVING子句
- CASE WHEN表达式如果包含聚合函数，不能直接用于GROUP BY

请根据以上信息生成准确的SQL语句。注意：
1. 只返回SQL语句，不要包含任何解释或注释
2. 使用正确的表名和字段名
3. 对于业务术语，使用对应的SQL条件和计算公式
4. 包含必要的JOIN和WHERE条件
5. 使用适当的聚合函数和GROUP BY
6. 确保SQL语法正确

SQL语句："#;

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    simple_template: String,
    complex_template: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            simple_template: SIMPLE_TEMPLATE.to_string(),
            complex_template: COMPLEX_TEMPLATE.to_string(),
        }
    }
}

impl PromptAssembler {
    pub fn with_templates(simple_template: String, complex_template: String) -> Self {
        Self {
            simple_template,
            complex_template,
        }
    }

    /// Build the SQL-generation prompt for a query.
    pub fn build_prompt(
        &self,
        query: &str,
        schema_info: &str,
        business_terms: &str,
        field_mappings: &str,
    ) -> Result<String> {
        let template = if is_complex_query(query) {
            debug!("using complex query template");
            &self.complex_template
        } else {
            debug!("using simple query template");
            &self.simple_template
        };

        if template.trim().is_empty() {
            return Err(DataProxyError::Prompt("提示词模板为空".to_string()));
        }

        let prompt = template
            .replace("{schema_info}", schema_info)
            .replace("{business_terms}", business_terms)
            .replace("{field_mappings}", field_mappings)
            // legacy templates name the terms block "business_rules"
            .replace("{business_rules}", business_terms)
            .replace("{query}", query);

        // a custom template may carry placeholders this assembler does not
        // know how to fill; that is a broken configuration, not a prompt
        if let Some(unfilled) = PLACEHOLDERS.iter().find(|p| prompt.contains(*p)) {
            return Err(DataProxyError::Prompt(format!(
                "提示词构建失败，未填充的占位符: {}",
                unfilled
            )));
        }

        Ok(prompt)
    }
}

/// Heuristic complexity check on the raw query text.
pub fn is_complex_query(query: &str) -> bool {
    COMPLEX_INDICATORS.iter().any(|re| re.is_match(query))
}
