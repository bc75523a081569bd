use mockito::Matcher;
use rust_decimal::Decimal;
use std::str::FromStr;

use tradebot::config::ExchangeConfig;
use tradebot::exchange::{
    AccountMirror, BinanceClient, CandleSource, ExchangeOrderStatus, NewOrder, OrderGateway,
};
use tradebot::{ExchangeError, OrderKind, Side};

fn client(base_url: String) -> BinanceClient {
    let config = ExchangeConfig {
        api_key: Some("test-key".to_string()),
        api_secret: Some("test-secret".to_string()),
        requests_per_second: 1000,
        ..Default::default()
    };
    BinanceClient::new(&config).unwrap().with_base_url(base_url)
}

fn signed_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::Regex(r"timestamp=\d+".to_string()),
        Matcher::Regex("recvWindow=5000".to_string()),
        Matcher::Regex("signature=[0-9a-f]{64}".to_string()),
    ])
}

#[tokio::test]
async fn test_last_price() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/ticker/price")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"symbol":"BTCUSDT","price":"50123.45000000"}"#)
        .create_async()
        .await;

    let price = client(server.url()).last_price("BTCUSDT").await.unwrap();
    assert_eq!(price, 50123.45);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_candles() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("interval".into(), "15m".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"[
                [1700000000000,"100.0","101.0","99.0","100.5","10.0",1700000899999,"1000.0",5,"5.0","500.0","0"],
                [1700000900000,"100.5","102.0","100.0","101.5","12.0",1700001799999,"1200.0",6,"6.0","600.0","0"]
            ]"#,
        )
        .create_async()
        .await;

    let candles = client(server.url())
        .fetch_candles("BTCUSDT", "15m", 2)
        .await
        .unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].close, 100.5);
    assert_eq!(candles[1].open_time.timestamp_millis(), 1700000900000);
    assert!(candles[0].open_time < candles[1].open_time);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_balances_are_signed_and_default_to_zero() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/account")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(signed_query())
        .with_status(200)
        .with_body(
            r#"{"balances":[
                {"asset":"USDT","free":"1250.50000000","locked":"0.00000000"},
                {"asset":"BNB","free":"0.10000000","locked":"0.00000000"}
            ]}"#,
        )
        .create_async()
        .await;

    let balances = client(server.url())
        .current_balances("BTC", "USDT")
        .await
        .unwrap();

    assert_eq!(balances.quote_balance, 1250.5);
    assert_eq!(balances.base_balance, 0.0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_place_market_order_full_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("side".into(), "BUY".into()),
            Matcher::UrlEncoded("type".into(), "MARKET".into()),
            Matcher::UrlEncoded("quantity".into(), "0.001".into()),
            Matcher::UrlEncoded("newClientOrderId".into(), "tb-abc".into()),
            Matcher::UrlEncoded("newOrderRespType".into(), "FULL".into()),
            signed_query(),
        ]))
        .with_status(200)
        .with_body(
            r#"{
                "symbol":"BTCUSDT","orderId":28,"clientOrderId":"tb-abc",
                "transactTime":1700000000123,"price":"0.00000000","origQty":"0.00100000",
                "executedQty":"0.00100000","cummulativeQuoteQty":"50.00000000",
                "status":"FILLED","timeInForce":"GTC","type":"MARKET","side":"BUY",
                "fills":[
                    {"price":"49990.00","qty":"0.00050000","commission":"0.0000005","commissionAsset":"BTC"},
                    {"price":"50010.00","qty":"0.00050000","commission":"0.0000005","commissionAsset":"BTC"}
                ]
            }"#,
        )
        .create_async()
        .await;

    let report = client(server.url())
        .place_order(&NewOrder {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            kind: OrderKind::Market,
            quantity: 0.001,
            client_order_id: "tb-abc".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(report.exchange_order_id, 28);
    assert_eq!(report.status, ExchangeOrderStatus::Filled);
    let (price, quantity) = report.confirmed_fill().unwrap();
    assert!((price - 50000.0).abs() < 1e-6);
    assert_eq!(quantity, 0.001);
    assert_eq!(report.commission_asset(), Some("BTC"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_query_unknown_order_is_none() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/order")
        .match_query(Matcher::UrlEncoded(
            "origClientOrderId".into(),
            "tb-missing".into(),
        ))
        .with_status(400)
        .with_body(r#"{"code":-2013,"msg":"Order does not exist."}"#)
        .create_async()
        .await;

    let result = client(server.url())
        .query_order("BTCUSDT", "tb-missing")
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_error_classification() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/ticker/price")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;
    server
        .mock("GET", "/api/v3/ticker/price")
        .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()))
        .with_status(429)
        .with_body(r#"{"code":-1003,"msg":"Too many requests."}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/api/v3/account")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
        .create_async()
        .await;

    let client = client(server.url());

    let err = client.last_price("BTCUSDT").await.unwrap_err();
    assert!(matches!(err, ExchangeError::Server { status: 503, .. }));
    assert!(err.is_transient());

    let err = client.last_price("ETHUSDT").await.unwrap_err();
    assert!(matches!(err, ExchangeError::RateLimited { status: 429, .. }));
    assert!(err.is_transient());

    let err = client.current_balances("BTC", "USDT").await.unwrap_err();
    assert!(matches!(err, ExchangeError::Authentication(_)));
    assert!(!err.is_transient());

    let err = client
        .place_order(&NewOrder {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            kind: OrderKind::Market,
            quantity: 1.0,
            client_order_id: "tb-broke".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Rejected { code: -2010, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_signed_call_without_credentials() {
    let server = mockito::Server::new_async().await;
    let client = BinanceClient::new(&ExchangeConfig::default())
        .unwrap()
        .with_base_url(server.url());

    assert!(!client.has_credentials());
    let err = client.current_balances("BTC", "USDT").await.unwrap_err();
    assert!(matches!(err, ExchangeError::Authentication(_)));
}

#[tokio::test]
async fn test_ping_and_lot_size() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/ping")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    server
        .mock("GET", "/api/v3/exchangeInfo")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_status(200)
        .with_body(
            r#"{"symbols":[{"symbol":"BTCUSDT","filters":[
                {"filterType":"PRICE_FILTER","minPrice":"0.01000000","maxPrice":"1000000.00000000","tickSize":"0.01000000"},
                {"filterType":"LOT_SIZE","minQty":"0.00001000","maxQty":"9000.00000000","stepSize":"0.00001000"}
            ]}]}"#,
        )
        .create_async()
        .await;

    let client = client(server.url());
    client.ping().await.unwrap();

    let lot = client.lot_size("BTCUSDT").await.unwrap();
    assert_eq!(lot.step_size, Decimal::from_str("0.00001").unwrap());
    assert_eq!(lot.normalize(0.000119), Some(0.00011));
    assert_eq!(lot.normalize(0.000001), None);
}

#[tokio::test]
async fn test_cancel_order() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("origClientOrderId".into(), "tb-rest".into()),
            signed_query(),
        ]))
        .with_status(200)
        .with_body(
            r#"{
                "symbol":"BTCUSDT","origClientOrderId":"tb-rest","orderId":31,"orderListId":-1,
                "clientOrderId":"cancel-9f2","transactTime":1700000100000,"price":"50100.00000000",
                "origQty":"0.00200000","executedQty":"0.00050000","cummulativeQuoteQty":"25.05000000",
                "status":"CANCELED","timeInForce":"GTC","type":"LIMIT","side":"SELL"
            }"#,
        )
        .create_async()
        .await;
    server
        .mock("DELETE", "/api/v3/order")
        .match_query(Matcher::UrlEncoded(
            "origClientOrderId".into(),
            "tb-closed".into(),
        ))
        .with_status(400)
        .with_body(r#"{"code":-2011,"msg":"Unknown order sent."}"#)
        .create_async()
        .await;

    let client = client(server.url());
    let report = client
        .cancel_order("BTCUSDT", "tb-rest")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.client_order_id, "tb-rest");
    assert_eq!(report.status, ExchangeOrderStatus::Canceled);
    // the part executed before the cancel still counts
    let (price, quantity) = report.confirmed_fill().unwrap();
    assert!((price - 50100.0).abs() < 1e-6);
    assert_eq!(quantity, 0.0005);
    mock.assert_async().await;

    assert!(client
        .cancel_order("BTCUSDT", "tb-closed")
        .await
        .unwrap()
        .is_none());
}
