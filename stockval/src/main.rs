//! Stockval - stock valuation CLI.
//!
//! ```text
//! stockval analyze -s AAPL -c US
//! stockval analyze -s 5801.JP -c JP -v
//! stockval chat-id
//! stockval check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stockval_common::config::{mask_secret, resolve_config_path};
use stockval_common::{init_logging, Settings};
use tracing::{error, info};

use stockval::analyze_stock;
use stockval::data::DataService;
use stockval::notification::{fetch_latest_chat_id, TelegramNotifier};

/// Stockval - Monte Carlo DCF/PE valuation with Telegram reports.
#[derive(Parser, Debug)]
#[command(name = "stockval")]
#[command(version)]
#[command(about = "股票估值分析工具", long_about = None)]
struct Cli {
    /// Configuration file (defaults: $STOCKVAL_CONFIG, ./conf.yaml, ~/.stockval/conf.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Value one stock and send the report
    Analyze {
        /// 股票代码 (如 AAPL, 5801.JP)
        #[arg(short, long)]
        symbol: String,

        /// 市场国家代码
        #[arg(short, long, value_parser = ["US", "JP"])]
        country: String,

        /// 显示详细日志和分析结果
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the chat id of the latest message sent to the bot
    ChatId,

    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "stockval failed");
            eprintln!("错误: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Analyze {
            symbol,
            country,
            verbose,
        } => analyze(config, &symbol, &country, verbose).await,
        Commands::ChatId => chat_id(config).await,
        Commands::CheckConfig => check_config(config),
    }
}

async fn analyze(config: Option<&Path>, symbol: &str, country: &str, verbose: bool) -> Result<()> {
    let path = resolve_config_path(config)?;
    let settings = Settings::load(Some(&path)).context("加载配置失败")?;
    let _guard = init_logging(&settings.logging, settings.effective_log_level(verbose))?;
    info!("stockval v{}", env!("CARGO_PKG_VERSION"));
    settings.log_summary(&path);

    let service = DataService::from_settings(&settings).await;
    let notifier = TelegramNotifier::new(&settings.telegram);

    let report = analyze_stock(&settings, symbol, country, &service, &notifier).await?;

    if verbose {
        println!("分析结果：");
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn chat_id(config: Option<&Path>) -> Result<()> {
    // chat_id is usually still empty here, so skip full validation
    let path = resolve_config_path(config)?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
    let mut settings = Settings::from_yaml_str(&content)?;
    settings.apply_env_overrides();
    let _guard = init_logging(&settings.logging, settings.effective_log_level(false))?;

    match fetch_latest_chat_id(&settings.telegram).await {
        Ok(Some(id)) => {
            println!("找到chat_id: {id}");
            println!("请将此chat_id添加到配置文件中");
            Ok(())
        }
        outcome => {
            if let Err(e) = &outcome {
                error!(error = %e, "获取chat_id时出错");
            }
            println!("获取chat_id失败，请确保:");
            println!("1. bot_token 正确");
            println!("2. 已经和机器人进行过对话");
            println!("3. 网络连接正常");
            anyhow::bail!("未能获取chat_id")
        }
    }
}

fn check_config(config: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config)?;
    let settings = Settings::load(Some(&path)).context("配置校验失败")?;

    println!("配置文件: {}", path.display());
    println!("运行环境: {}", settings.env_state);
    println!("FMP API key: {}", mask_secret(&settings.fmp.api_key));
    println!("FMP 报告周期: {}", settings.fmp.period);
    println!("Telegram bot token: {}", mask_secret(&settings.telegram.bot_token));
    println!("Telegram chat_id: {}", settings.telegram.chat_id);
    println!("数据源顺序: {}", settings.data_sources.priority.join(" → "));
    println!(
        "模型: {} 次模拟, 无风险利率 {:.2}%, 估值分位 {}",
        settings.model.monte_carlo_sims,
        settings.model.risk_free_rate * 100.0,
        settings.model.pe_percentile
    );
    println!("日志级别: {}", settings.logging.level);
    Ok(())
}
