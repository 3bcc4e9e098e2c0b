//! Reveal containers and connection calls: values flow into secure frames
//! and out to gateways, never through the page.

mod common;

use assert_json_diff::assert_json_eq;
use common::{page, sdk, MockVault};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use vaultframe::client::RequestMethod;
use vaultframe::records::TokenRef;
use vaultframe::{
    ConnectionConfig, ConnectionValue, ContainerType, Element, ElementOptions,
    RevealElementInput, SdkError, SoapConnectionConfig,
};

// =============================================================================
// Reveal
// =============================================================================

#[tokio::test]
async fn reveal_renders_into_the_frame() {
    let vault = MockVault::new();
    let page = page(&vault, &["#pan"]);
    let sdk = sdk(&page);
    let container = sdk
        .container(ContainerType::Reveal)
        .unwrap()
        .into_reveal()
        .unwrap();

    let pan = container
        .create(RevealElementInput {
            label: Some("Card number".into()),
            alt_text: Some("XXXX XXXX XXXX XXXX".into()),
            ..RevealElementInput::token("tok-1")
        })
        .unwrap();
    pan.mount("#pan").unwrap();
    page.settle().await;

    let frame = page.reveal_frame(pan.frame_name()).unwrap();
    assert_eq!(frame.token(), Some("tok-1"));
    assert_eq!(frame.label().as_deref(), Some("Card number"));
    assert_eq!(frame.display().as_deref(), Some("XXXX XXXX XXXX XXXX"));
    assert!(!frame.is_revealed());

    vault.reply(json!({"records": [{"token": "tok-1", "value": "4111111111111111"}]}));
    let summary = container.reveal().await.unwrap();
    assert_eq!(
        summary.success,
        vec![TokenRef {
            token: "tok-1".into()
        }]
    );
    assert!(summary.errors.is_empty());
    assert!(frame.is_revealed());
    assert_eq!(frame.display().as_deref(), Some("4111111111111111"));

    let url = &vault.seen()[0].url;
    assert!(url.contains("/v1/vaults/vault1/tokens?"));
    assert!(url.contains("token_ids=tok-1"));
}

#[tokio::test]
async fn reveal_reports_tokens_the_vault_rejects() {
    let vault = MockVault::new();
    let page = page(&vault, &["#pan"]);
    let sdk = sdk(&page);
    let container = sdk.reveal_container().unwrap();
    let pan = container.create(RevealElementInput::token("tok-x")).unwrap();
    pan.mount("#pan").unwrap();
    page.settle().await;

    vault.fail(404, "Token not found for tok-x");
    let summary = container.reveal().await.unwrap();
    assert!(summary.success.is_empty());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].token.as_deref(), Some("tok-x"));

    let frame = page.reveal_frame(pan.frame_name()).unwrap();
    assert!(!frame.is_revealed());
    assert_eq!(frame.display().as_deref(), Some("tok-x"));
}

#[tokio::test]
async fn reveal_checks_its_elements_first() {
    let vault = MockVault::new();
    let page = page(&vault, &["#a"]);
    let sdk = sdk(&page);
    let container = sdk.reveal_container().unwrap();

    let err = container.reveal().await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidInput(_)), "{err:?}");

    let err = container.create(RevealElementInput::token("  ")).unwrap_err();
    assert!(matches!(err, SdkError::InvalidInput(_)), "{err:?}");
    let err = container
        .create(RevealElementInput {
            replace_text: Some("*".into()),
            ..RevealElementInput::token("tok-1")
        })
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidInput(_)), "{err:?}");

    let unmounted = container.create(RevealElementInput::token("tok-1")).unwrap();
    let err = container.reveal().await.unwrap_err();
    assert_eq!(err, SdkError::ElementsNotMounted(unmounted.frame_name().into()));

    unmounted.mount("#a").unwrap();
    let tokenless = container.create(RevealElementInput::default()).unwrap();
    tokenless.mount("#a").unwrap();
    let err = container.reveal().await.unwrap_err();
    assert_eq!(
        err,
        SdkError::ElementMustHaveToken(tokenless.frame_name().into())
    );
    assert!(vault.seen().is_empty());
}

// =============================================================================
// REST connections
// =============================================================================

#[tokio::test]
async fn connection_swaps_values_in_and_renders_responses() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv", "#pan"]);
    let sdk = sdk(&page);

    let collect = sdk.collect_container().unwrap();
    let cvv = collect.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    cvv.mount("#cvv").unwrap();
    let reveal = sdk.reveal_container().unwrap();
    let pan = reveal
        .create(RevealElementInput {
            format_regex: Some("[0-9]{4}$".into()),
            ..Default::default()
        })
        .unwrap();
    pan.mount("#pan").unwrap();
    page.settle().await;
    page.collect_frame(cvv.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("123");

    let mut query = BTreeMap::new();
    query.insert("ref".to_string(), ConnectionValue::from("order-7"));
    let config = ConnectionConfig {
        query_params: Some(query),
        request_body: Some(ConnectionValue::object([
            ("card", ConnectionValue::object([("cvv", ConnectionValue::from(&cvv))])),
            ("amount", ConnectionValue::from(json!(10))),
        ])),
        response_body: Some(ConnectionValue::object([(
            "card",
            ConnectionValue::object([("number", ConnectionValue::from(&pan))]),
        )])),
        ..ConnectionConfig::new("https://gw.example/pay", RequestMethod::Post)
    };

    vault.reply(json!({"card": {"number": "4111111111111111"}, "status": "ok"}));
    let response = sdk.invoke_connection(&config).await.unwrap();
    assert_eq!(response["status"], "ok");
    assert!(response["card"].get("number").is_none());

    let frame = page.reveal_frame(pan.frame_name()).unwrap();
    assert_eq!(frame.display().as_deref(), Some("1111"));

    let seen = vault.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].url, "https://gw.example/pay?ref=order-7");
    assert!(seen[0].headers.contains_key("X-Skyflow-Authorization"));
    assert!(!seen[0].headers.contains_key("Authorization"));
    assert_json_eq!(
        seen[0].body.clone().unwrap(),
        json!({"card": {"cvv": "123"}, "amount": 10})
    );
}

#[tokio::test]
async fn connection_is_checked_on_the_host() {
    let vault = MockVault::new();
    let page = page(&vault, &[]);
    let sdk = sdk(&page);
    let collect = sdk.collect_container().unwrap();
    let cvv = collect.create("cvv", ElementOptions::named("card.cvv")).unwrap();

    let plain = ConnectionConfig::new("http://gw.example/pay", RequestMethod::Post);
    let err = sdk.invoke_connection(&plain).await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidInput(_)), "{err:?}");

    let unmounted = ConnectionConfig {
        request_body: Some(ConnectionValue::object([("cvv", ConnectionValue::from(&cvv))])),
        ..ConnectionConfig::new("https://gw.example/pay", RequestMethod::Post)
    };
    let err = sdk.invoke_connection(&unmounted).await.unwrap_err();
    assert_eq!(err, SdkError::ElementsNotMounted("card.cvv".into()));

    let spoofed = ConnectionConfig {
        request_body: Some(json!({"cvv": "element:cvv:card.cvv"}).into()),
        ..ConnectionConfig::new("https://gw.example/pay", RequestMethod::Post)
    };
    let err = sdk.invoke_connection(&spoofed).await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidInput(_)), "{err:?}");

    assert!(vault.seen().is_empty());
}

#[tokio::test]
async fn connection_reads_the_referenced_container() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv-a", "#cvv-b"]);
    let sdk = sdk(&page);

    let first = sdk.collect_container().unwrap();
    let second = sdk.collect_container().unwrap();
    let cvv_a = first.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    let cvv_b = second.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    cvv_a.mount("#cvv-a").unwrap();
    cvv_b.mount("#cvv-b").unwrap();
    page.settle().await;
    assert_eq!(cvv_a.frame_name(), cvv_b.frame_name());

    for (container, element, value) in [(&first, &cvv_a, "111"), (&second, &cvv_b, "222")] {
        page.collect_frame_in(container.id(), element.frame_name())
            .unwrap()
            .element()
            .unwrap()
            .input(value);
    }

    let pay_with = |element: &Element| ConnectionConfig {
        request_body: Some(ConnectionValue::object([("cvv", ConnectionValue::from(element))])),
        ..ConnectionConfig::new("https://gw.example/pay", RequestMethod::Post)
    };
    vault.reply(json!({"status": "ok"}));
    sdk.invoke_connection(&pay_with(&cvv_a)).await.unwrap();
    vault.reply(json!({"status": "ok"}));
    sdk.invoke_connection(&pay_with(&cvv_b)).await.unwrap();

    let soap = SoapConnectionConfig::new(
        "https://gw.example/soap",
        format!("<Envelope><Cvv><Skyflow>{}</Skyflow></Cvv></Envelope>", cvv_a.id()),
    );
    vault.reply(Value::String("<Envelope><Ok>true</Ok></Envelope>".into()));
    sdk.invoke_soap_connection(&soap).await.unwrap();

    let seen = vault.seen();
    assert_eq!(seen.len(), 3);
    assert_json_eq!(seen[0].body.clone().unwrap(), json!({"cvv": "111"}));
    assert_json_eq!(seen[1].body.clone().unwrap(), json!({"cvv": "222"}));
    assert_eq!(
        seen[2].body,
        Some(Value::String("<Envelope><Cvv>111</Cvv></Envelope>".into()))
    );
}

// =============================================================================
// SOAP connections
// =============================================================================

#[tokio::test]
async fn soap_connection_maps_request_and_response() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv", "#ssn"]);
    let sdk = sdk(&page);

    let collect = sdk.collect_container().unwrap();
    let cvv = collect.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    cvv.mount("#cvv").unwrap();
    let reveal = sdk.reveal_container().unwrap();
    let ssn = reveal.create(RevealElementInput::default()).unwrap();
    ssn.mount("#ssn").unwrap();
    page.settle().await;
    page.collect_frame(cvv.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("123");

    let mut config = SoapConnectionConfig::new(
        "https://gw.example/soap",
        format!(
            "<Envelope><Body><Cvv><Skyflow>{}</Skyflow></Cvv></Body></Envelope>",
            cvv.id()
        ),
    );
    config.response_xml = Some(format!(
        "<Envelope><Body><Ssn><Skyflow>{}</Skyflow></Ssn></Body></Envelope>",
        ssn.id()
    ));

    vault.reply(Value::String(
        "<Envelope><Body><Ssn>123-45-6789</Ssn><Ok>true</Ok></Body></Envelope>".into(),
    ));
    let response = sdk.invoke_soap_connection(&config).await.unwrap();
    assert_eq!(response, "<Envelope><Body><Ok>true</Ok></Body></Envelope>");

    let frame = page.reveal_frame(ssn.frame_name()).unwrap();
    assert_eq!(frame.display().as_deref(), Some("123-45-6789"));

    let seen = vault.seen();
    assert_eq!(seen[0].method, RequestMethod::Post);
    assert_eq!(
        seen[0].body,
        Some(Value::String(
            "<Envelope><Body><Cvv>123</Cvv></Body></Envelope>".into()
        ))
    );
    assert_eq!(
        seen[0].headers.get("Content-Type").map(String::as_str),
        Some("text/xml;charset=UTF-8")
    );
}

#[tokio::test]
async fn soap_connection_rejects_unknown_and_repeated_ids() {
    let vault = MockVault::new();
    let page = page(&vault, &["#ssn"]);
    let sdk = sdk(&page);
    let reveal = sdk.reveal_container().unwrap();
    let ssn = reveal.create(RevealElementInput::default()).unwrap();
    ssn.mount("#ssn").unwrap();

    let unknown = SoapConnectionConfig::new(
        "https://gw.example/soap",
        "<Envelope><Skyflow>nope</Skyflow></Envelope>",
    );
    let err = sdk.invoke_soap_connection(&unknown).await.unwrap_err();
    assert_eq!(err, SdkError::InvalidElementIdInSoapXml("nope".into()));

    let mut repeated = SoapConnectionConfig::new("https://gw.example/soap", "<Envelope/>");
    repeated.response_xml = Some(format!(
        "<Envelope><A><Skyflow>{id}</Skyflow></A><B><Skyflow>{id}</Skyflow></B></Envelope>",
        id = ssn.id()
    ));
    let err = sdk.invoke_soap_connection(&repeated).await.unwrap_err();
    assert_eq!(err, SdkError::DuplicateElementInSoapXml(ssn.id().into()));

    assert!(vault.seen().is_empty());
}
