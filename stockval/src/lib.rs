//! Stockval Library
//!
//! Values a listed company from its fundamentals and reports the result to
//! Telegram.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         stockval                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ DataService  │──▶│ Monte Carlo  │──▶│ TelegramNotifier │   │
//! │  │ FMP/AV/Yahoo │   │  DCF + PE    │   │  queued delivery │   │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Flow
//!
//! 1. Normalise the symbol for the target market (`5801.JP` → `TYO:5801`)
//! 2. Fetch quote and fundamentals concurrently, with provider failover
//! 3. Run the simulation on the blocking pool
//! 4. Send the report; on failure send an error alert instead

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod notification;
pub mod valuation;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use stockval_common::Settings;
use tracing::{error, info, warn};

use crate::data::{format_stock_symbol, DataService, Market};
use crate::notification::{ErrorAlert, Notification, Notifier};
use crate::valuation::{MonteCarloValuator, ValuationReport};

/// Module name reported in workflow error alerts.
pub const ANALYSIS_MODULE: &str = "主分析流程";

/// Operator advice attached to workflow error alerts.
pub const ANALYSIS_ADVICE: &str = "检查输入参数或联系系统管理员";

/// Analyse one stock end to end and deliver the report.
///
/// Any failure is reported through `notifier` as an error alert and then
/// returned. `service` and `notifier` are closed before returning in every
/// case.
pub async fn analyze_stock(
    settings: &Settings,
    symbol: &str,
    country: &str,
    service: &DataService,
    notifier: &dyn Notifier,
) -> Result<ValuationReport> {
    let outcome = run_analysis(settings, symbol, country, service, notifier).await;

    if let Err(e) = &outcome {
        error!(symbol, country, error = %format!("{e:#}"), "分析流程失败");
        let alert = ErrorAlert::new(ANALYSIS_MODULE, format!("{e:#}"), ANALYSIS_ADVICE);
        if let Err(send_err) = notifier.notify(Notification::Error(alert)).await {
            warn!(error = %send_err, "无法发送错误通知");
        }
    }

    service.close().await;
    notifier.close().await;
    outcome
}

async fn run_analysis(
    settings: &Settings,
    symbol: &str,
    country: &str,
    service: &DataService,
    notifier: &dyn Notifier,
) -> Result<ValuationReport> {
    let market: Market = country.parse()?;
    let formatted = format_stock_symbol(symbol, country)?;
    info!(input = symbol, symbol = %formatted, %market, "开始分析");

    let (market_data, financials) = tokio::try_join!(
        service.get_market_data(&formatted),
        service.get_financials(&formatted),
    )
    .with_context(|| format!("获取 {formatted} 数据失败"))?;

    let valuator = MonteCarloValuator::new(&settings.model);
    let (fin, quote) = (financials.clone(), market_data.clone());
    let result = tokio::task::spawn_blocking(move || valuator.run(&fin, &quote))
        .await
        .context("估值任务异常退出")??;

    let currency = if financials.currency.trim().is_empty() {
        market_data
            .currency
            .clone()
            .unwrap_or_else(|| "USD".to_string())
    } else {
        financials.currency.clone()
    };

    let report = ValuationReport {
        symbol: formatted,
        market,
        date: parse_report_date(financials.report_date.as_deref()),
        current_price: market_data.price,
        currency,
        range: result.valuation_range,
        probabilities: result.probabilities,
        next_quarters: result.next_quarters,
        generated_at: Local::now(),
    };

    notifier
        .notify(Notification::Valuation(Box::new(report.clone())))
        .await
        .context("发送估值报告失败")?;

    info!(
        symbol = %report.symbol,
        low = report.range.low,
        medium = report.range.medium,
        high = report.range.high,
        "分析完成"
    );
    Ok(report)
}

/// Report date from a provider string such as `2023-09-30` or
/// `2023-09-30 00:00:00`. Only the first 10 characters are considered.
pub fn parse_report_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    let head: String = raw.trim().chars().take(10).collect();
    match NaiveDate::parse_from_str(&head, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(raw, error = %e, "无法解析财报日期");
            None
        }
    }
}
