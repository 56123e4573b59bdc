//! FMP adapter against a mocked HTTP API.

use serde_json::json;
use std::sync::Arc;
use stockval::data::{
    DataProvider, DataService, FmpProvider, ProviderError, RetryPolicy, RouterConfig,
};
use stockval_common::config::{FmpConfig, ReportingPeriod};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "testkey1234567890";

fn provider(server: &MockServer, period: ReportingPeriod) -> FmpProvider {
    FmpProvider::new(&FmpConfig {
        api_key: KEY.into(),
        timeout: 5,
        period,
        base_url: server.uri(),
    })
    .with_retry_policy(RetryPolicy::immediate(2))
}

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(query_param("apikey", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetches_market_data() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/stock/full/real-time-price/AAPL",
        json!([{"symbol": "AAPL", "fmpLast": 189.5, "volume": 5.1e7}]),
    )
    .await;
    mount_json(
        &server,
        "/ratios-ttm/AAPL",
        json!([{"priceEarningsRatioTTM": 29.4}]),
    )
    .await;

    let data = provider(&server, ReportingPeriod::Annual)
        .fetch_market_data("AAPL")
        .await
        .unwrap();

    assert_eq!(data.source, "fmp");
    assert_eq!(data.price, 189.5);
    assert_eq!(data.pe_ratio, Some(29.4));
    assert_eq!(data.volume, Some(5.1e7));
}

#[tokio::test]
async fn fetches_financials_with_period() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cash-flow-statement/TYO:7203"))
        .and(query_param("period", "quarter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"date": "2024-03-31", "freeCashFlow": 1.2e12}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/income-statement/TYO:7203"))
        .and(query_param("period", "quarter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "date": "2024-03-31",
            "reportedCurrency": "JPY",
            "eps": 365.9,
            "revenue": 4.5e13,
            "netIncome": 4.9e12
        }])))
        .mount(&server)
        .await;
    mount_json(
        &server,
        "/profile/TYO:7203",
        json!([{"price": 2800.0, "mktCap": 4.2e13, "currency": "JPY"}]),
    )
    .await;

    let data = provider(&server, ReportingPeriod::Quarter)
        .fetch_financials("TYO:7203")
        .await
        .unwrap();

    assert_eq!(data.currency, "JPY");
    assert_eq!(data.eps, 365.9);
    assert_eq!(data.free_cash_flow, 1.2e12);
    assert_eq!(data.net_income, 4.9e12);
    assert_eq!(data.report_date.as_deref(), Some("2024-03-31"));
    assert!((data.shares_outstanding - 1.5e10).abs() < 1.0);
}

#[tokio::test]
async fn forbidden_is_auth_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Invalid API KEY"))
        .expect(1..=2) // at most one per endpoint, never retried
        .mount(&server)
        .await;

    let err = provider(&server, ReportingPeriod::Annual)
        .fetch_market_data("AAPL")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(err.should_failover());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/profile/AAPL"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_json(&server, "/profile/AAPL", json!([{"price": 190.0, "mktCap": 2.9e12}])).await;
    mount_json(&server, "/cash-flow-statement/AAPL", json!([{"freeCashFlow": 9.9e10}])).await;
    mount_json(
        &server,
        "/income-statement/AAPL",
        json!([{"date": "2023-09-30", "eps": 6.13, "revenue": 3.8e11, "netIncome": 9.7e10}]),
    )
    .await;

    let data = provider(&server, ReportingPeriod::Annual)
        .fetch_financials("AAPL")
        .await
        .unwrap();
    assert_eq!(data.currency, "USD");
    assert!((data.shares_outstanding - 2.9e12 / 190.0).abs() < 1.0);
}

#[tokio::test]
async fn router_does_not_stack_retries_on_fmp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stock/full/real-time-price/AAPL"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // one request plus the adapter's two retries
        .mount(&server)
        .await;
    mount_json(&server, "/ratios-ttm/AAPL", json!([{"priceEarningsRatioTTM": 29.4}])).await;

    let service = DataService::with_config(RouterConfig {
        retry: RetryPolicy::immediate(3),
        ..Default::default()
    });
    service
        .register(Arc::new(provider(&server, ReportingPeriod::Annual)))
        .await;

    let err = service.get_market_data("AAPL").await.unwrap_err();
    let ProviderError::AllFailed(failures) = &err else {
        panic!("expected AllFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, ProviderError::Unavailable(_)));
}

#[tokio::test]
async fn empty_list_is_data_not_available() {
    let server = MockServer::start().await;
    mount_json(&server, "/stock/full/real-time-price/NOPE", json!([])).await;
    mount_json(&server, "/ratios-ttm/NOPE", json!([])).await;

    let err = provider(&server, ReportingPeriod::Annual)
        .fetch_market_data("NOPE")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}
