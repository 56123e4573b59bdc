//! Telegram message templates.
//!
//! Output uses Telegram's legacy `Markdown` parse mode: `*bold*`, `_italic_`
//! and fenced code blocks for the tables.

use chrono::{DateTime, Local};

use super::{ErrorAlert, Notification, RiskWarning};
use crate::valuation::{QuarterForecast, ValuationReport};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders [`Notification`]s to Markdown text.
#[derive(Debug, Clone, Default)]
pub struct MessageFormatter;

impl MessageFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, notification: &Notification) -> String {
        match notification {
            Notification::Valuation(report) => self.valuation(report),
            Notification::Error(alert) => self.error(alert),
            Notification::Warning(warning) => self.warning(warning),
            Notification::Text(text) => text.trim().to_string(),
        }
    }

    pub fn valuation(&self, report: &ValuationReport) -> String {
        let sym = currency_symbol(&report.currency);
        let range = &report.range;
        let report_date = report
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "未知".to_string());

        format!(
            "*{symbol} 估值分析报告* 📈\n\
             🕒 报告时间: {timestamp}\n\
             🌍 市场: {market}\n\
             📅 财报日期: {report_date}\n\
             \n\
             *当前价格*: {sym}{price:.2} ({currency})\n\
             \n\
             *合理估值范围*:\n\
             ```\n\
             ┌─────────────┬───────────┐\n\
             │ 分位点      │ 价格      │\n\
             ├─────────────┼───────────┤\n\
             │ {low_label:<11} │ {sym}{low:.2} │\n\
             │ 中位数      │ {sym}{medium:.2} │\n\
             │ {high_label:<11} │ {sym}{high:.2} │\n\
             └─────────────┴───────────┘\n\
             ```\n\
             \n\
             *市场概率评估*:\n\
             - 📉 低估概率: {undervalued:.1}%\n\
             - 📈 高估概率: {overvalued:.1}%\n\
             - ⚖️ 合理概率: {fair:.1}%\n\
             \n\
             *未来四季预测*:\n\
             {forecast}\n\
             \n\
             _数据来源：市场数据接口，蒙特卡洛模拟结果_",
            symbol = report.symbol,
            timestamp = report.generated_at.format(TIMESTAMP_FORMAT),
            market = detect_market(&report.currency),
            price = report.current_price,
            currency = report.currency,
            low_label = format!("{}% 低估线", trim_percent(range.low_percentile)),
            high_label = format!("{}% 高估线", trim_percent(range.high_percentile)),
            low = range.low,
            medium = range.medium,
            high = range.high,
            undervalued = report.probabilities.undervalued * 100.0,
            overvalued = report.probabilities.overvalued * 100.0,
            fair = report.probabilities.fair_valued * 100.0,
            forecast = forecast_table(&report.next_quarters, sym),
        )
    }

    pub fn error(&self, alert: &ErrorAlert) -> String {
        format!(
            "🚨 *系统警报* 🚨\n\
             错误时间: {}\n\
             模块: {}\n\
             错误详情:\n\
             ```\n{}\n```\n\
             建议操作: {}",
            timestamp(alert.timestamp),
            alert.module,
            alert.error_info.trim(),
            alert.advice
        )
    }

    pub fn warning(&self, warning: &RiskWarning) -> String {
        let metrics = if warning.metrics.is_empty() {
            "- 无".to_string()
        } else {
            warning
                .metrics
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "⚠️ *风险预警* ⚠️\n\
             检测时间: {}\n\
             股票代码: {}\n\
             预警指标:\n{}\n\
             \n\
             建议关注: {}",
            timestamp(warning.timestamp),
            warning.symbol,
            metrics,
            warning.advice
        )
    }
}

/// Exchange label derived from the reporting currency.
pub fn detect_market(currency: &str) -> &'static str {
    if currency.eq_ignore_ascii_case("JPY") {
        "东京证交所"
    } else {
        "纽交所/纳斯达克"
    }
}

fn currency_symbol(currency: &str) -> &'static str {
    match currency.to_ascii_uppercase().as_str() {
        "USD" => "$",
        "JPY" => "¥",
        _ => "",
    }
}

fn timestamp(at: Option<DateTime<Local>>) -> String {
    at.unwrap_or_else(Local::now).format(TIMESTAMP_FORMAT).to_string()
}

fn trim_percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn forecast_table(quarters: &[QuarterForecast], sym: &str) -> String {
    let rows: Vec<String> = quarters
        .iter()
        .map(|q| {
            format!(
                "│ {:<4} │ {sym}{:.2} │ {sym}{:.2} │ {sym}{:.2} │",
                format!("Q{}", q.quarter),
                q.low,
                q.median,
                q.high
            )
        })
        .collect();

    format!(
        "```\n\
         ┌──────┬─────────┬─────────┬─────────┐\n\
         │ 季度 │ 悲观估值 │ 中性估值 │ 乐观估值 │\n\
         ├──────┼─────────┼─────────┼─────────┤\n\
         {}\n\
         └──────┴─────────┴─────────┴─────────┘\n\
         ```",
        rows.join("\n")
    )
}
