//! Collect containers end to end: host elements, element frames, the collect
//! controller and a scripted vault, all on one in-process page.

mod common;

use assert_json_diff::assert_json_include;
use common::{page, sdk, MockVault};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vaultframe::bus::events::ElementEvent;
use vaultframe::client::RequestMethod;
use vaultframe::{CollectOptions, ElementOptions, ElementType, InsertRecord, SdkError};

// =============================================================================
// Tokenization
// =============================================================================

#[tokio::test]
async fn collect_tokenizes_card_fields() {
    let vault = MockVault::new();
    let page = page(&vault, &["#card-number", "#cvv"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();

    let card = container
        .create("card_number", ElementOptions::named("cards.card_number"))
        .unwrap();
    let cvv = container.create("cvv", ElementOptions::named("cards.cvv")).unwrap();
    card.mount("#card-number").unwrap();
    cvv.mount("#cvv").unwrap();
    page.settle().await;

    page.collect_frame(card.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("4111 1111 1111 1111");
    page.collect_frame(cvv.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("123");

    vault.reply(json!({
        "records": [{
            "table": "cards",
            "fields": {"card_number": "tok-pan", "cvv": "tok-cvv", "skyflow_id": "id1"}
        }]
    }));
    let response = container.collect(CollectOptions::default()).await.unwrap();

    assert_eq!(response.records.len(), 2);
    let tokens: Vec<_> = response
        .records
        .iter()
        .filter_map(|r| r.token.as_deref())
        .collect();
    assert!(tokens.contains(&"tok-pan"));
    assert!(tokens.contains(&"tok-cvv"));

    let seen = vault.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, RequestMethod::Post);
    assert_eq!(seen[0].url, "https://vault.example/v1/vaults/vault1");
    assert_json_include!(
        actual: seen[0].body.clone().unwrap(),
        expected: json!({
            "records": [{
                "table": "cards",
                "fields": {"card_number": "4111111111111111", "cvv": "123"}
            }]
        })
    );

    // The page sees validity, never the number.
    let state = card.get_state();
    assert!(state.is_valid);
    assert!(!state.is_empty);
    assert_eq!(state.value, None);
}

#[tokio::test]
async fn collect_merges_additional_fields() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let cvv = container.create("cvv", ElementOptions::named("cards.cvv")).unwrap();
    cvv.mount("#cvv").unwrap();
    page.settle().await;
    page.collect_frame(cvv.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("4321");

    vault.reply(json!({
        "records": [{"table": "cards", "fields": {"cvv": "tok-cvv", "holder": "tok-holder"}}]
    }));
    let mut fields = serde_json::Map::new();
    fields.insert("holder".into(), json!("Joey"));
    let options = CollectOptions {
        tokens: true,
        additional_fields: Some(vec![InsertRecord {
            table: "cards".into(),
            fields,
        }]),
    };
    let response = container.collect(options).await.unwrap();
    assert_eq!(response.records.len(), 2);

    assert_json_include!(
        actual: vault.seen()[0].body.clone().unwrap(),
        expected: json!({
            "records": [{"table": "cards", "fields": {"cvv": "4321", "holder": "Joey"}}]
        })
    );
}

#[tokio::test]
async fn collect_rejects_incomplete_input_before_the_vault() {
    let vault = MockVault::new();
    let page = page(&vault, &["#card-number"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let card = container
        .create("card_number", ElementOptions::named("cards.card_number"))
        .unwrap();
    card.mount("#card-number").unwrap();
    page.settle().await;
    page.collect_frame(card.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("4111");

    let err = container.collect(CollectOptions::default()).await.unwrap_err();
    assert!(matches!(err, SdkError::IncompleteInputs(_)), "{err:?}");
    assert!(vault.seen().is_empty());
    assert!(!card.get_state().is_valid);
}

#[tokio::test]
async fn containers_collect_only_their_own_fields() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv-a", "#cvv-b"]);
    let sdk = sdk(&page);

    let first = sdk.collect_container().unwrap();
    let second = sdk.collect_container().unwrap();
    let cvv_a = first.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    // The same name is free in another container.
    let cvv_b = second.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    cvv_a.mount("#cvv-a").unwrap();
    cvv_b.mount("#cvv-b").unwrap();
    page.settle().await;

    page.collect_frame_in(first.id(), cvv_a.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("111");
    page.collect_frame_in(second.id(), cvv_b.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .input("222");

    vault.reply(json!({"records": [{"table": "card", "fields": {"cvv": "tok-b"}}]}));
    vault.reply(json!({"records": [{"table": "card", "fields": {"cvv": "tok-a"}}]}));
    second.collect(CollectOptions::default()).await.unwrap();
    first.collect(CollectOptions::default()).await.unwrap();

    let seen = vault.seen();
    assert_eq!(seen[0].body.clone().unwrap()["records"][0]["fields"]["cvv"], "222");
    assert_eq!(seen[1].body.clone().unwrap()["records"][0]["fields"]["cvv"], "111");
}

#[tokio::test]
async fn collect_requires_every_element_mounted() {
    let vault = MockVault::new();
    let page = page(&vault, &[]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    container
        .create(
            "text",
            ElementOptions {
                validation: Some(vec!["required".into()]),
                ..ElementOptions::named("users.name")
            },
        )
        .unwrap();

    let err = container.collect(CollectOptions::default()).await.unwrap_err();
    assert_eq!(err, SdkError::ElementsNotMounted("users.name".into()));
    assert!(vault.seen().is_empty());
}

// =============================================================================
// Element lifecycle
// =============================================================================

#[tokio::test]
async fn duplicate_elements_are_rejected() {
    let vault = MockVault::new();
    let page = page(&vault, &["#cvv"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();

    let cvv = container.create("cvv", ElementOptions::named("card.cvv")).unwrap();
    cvv.mount("#cvv").unwrap();
    let err = container
        .create("cvv", ElementOptions::named("card.cvv"))
        .unwrap_err();
    assert_eq!(err, SdkError::DuplicateElement(cvv.frame_name().into()));

    let frames = page.frame_names();
    assert_eq!(frames.iter().filter(|n| *n == cvv.frame_name()).count(), 1);
    assert_eq!(container.get_elements().len(), 1);
    assert!(container
        .get_element(ElementType::Cvv, "card.cvv", None)
        .is_some());
}

#[tokio::test]
async fn create_and_mount_reject_bad_input() {
    let vault = MockVault::new();
    let page = page(&vault, &[]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();

    let err = container
        .create("hologram", ElementOptions::named("x.y"))
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidElementType(_)), "{err:?}");

    let text = container.create("text", ElementOptions::named("x.y")).unwrap();
    let err = text.mount("#missing").unwrap_err();
    assert_eq!(err, SdkError::InvalidSelector("#missing".into()));
    assert!(!text.is_mounted());
}

#[tokio::test]
async fn mount_places_the_frame_under_its_node() {
    let vault = MockVault::new();
    let page = page(&vault, &["#a", "#b"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let pin = container.create("pin", ElementOptions::named("card.pin")).unwrap();

    pin.mount("#a").unwrap();
    assert_eq!(page.parent_of(pin.frame_name()), page.node("#a"));
    page.settle().await;
    assert!(pin.is_ready());

    // Mounting again moves the frame rather than duplicating it.
    pin.mount("#b").unwrap();
    assert!(!pin.is_ready());
    assert_eq!(page.parent_of(pin.frame_name()), page.node("#b"));
    let frames = page.frame_names();
    assert_eq!(frames.iter().filter(|n| *n == pin.frame_name()).count(), 1);

    page.settle().await;
    pin.wait_ready().await.unwrap();
    assert!(pin.is_ready());

    pin.unmount();
    assert!(!page.is_attached(pin.frame_name()));
    assert!(!pin.is_ready());
}

#[tokio::test]
async fn destroy_removes_field_frame_and_entry() {
    let vault = MockVault::new();
    let page = page(&vault, &["#zip"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let zip = container.create("zip_code", ElementOptions::named("addr.zip")).unwrap();
    zip.mount("#zip").unwrap();
    page.settle().await;

    let controller = page
        .controller(&format!("collect_controller:{}", container.id()))
        .unwrap();
    assert_eq!(controller.form().unwrap().len(), 1);

    let destroyed = Arc::new(AtomicUsize::new(0));
    let seen = destroyed.clone();
    let _handle = zip.on_destroy(move |element_type| {
        assert_eq!(*element_type, ElementType::ZipCode);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    zip.destroy().await.unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(controller.form().unwrap().is_empty());
    assert!(!page.is_attached(zip.frame_name()));
    assert!(container.get_elements().is_empty());

    // The name is free again.
    assert!(container.create("zip_code", ElementOptions::named("addr.zip")).is_ok());
}

// =============================================================================
// Radio and checkbox
// =============================================================================

#[tokio::test]
async fn checked_checkboxes_collect_as_an_array() {
    let vault = MockVault::new();
    let page = page(&vault, &["#bronze", "#gold", "#silver"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();

    // Values come out in registration order, not sorted.
    let mut boxes = Vec::new();
    for plan in ["gold", "bronze", "silver"] {
        let element = container
            .create(
                "checkbox",
                ElementOptions {
                    value: Some(plan.into()),
                    ..ElementOptions::named("prefs.plan")
                },
            )
            .unwrap();
        element.mount(format!("#{plan}")).unwrap();
        boxes.push(element);
    }
    page.settle().await;

    for element in &boxes[..2] {
        page.collect_frame(element.frame_name())
            .unwrap()
            .element()
            .unwrap()
            .select();
    }
    assert!(page
        .collect_frame(boxes[0].frame_name())
        .unwrap()
        .element()
        .unwrap()
        .is_checked());

    vault.reply(json!({
        "records": [{"table": "prefs", "fields": {"plan": "tok-plan"}}]
    }));
    container.collect(CollectOptions::default()).await.unwrap();

    let body = vault.seen()[0].body.clone().unwrap();
    assert_eq!(body["records"][0]["fields"]["plan"], json!(["gold", "bronze"]));
}

#[tokio::test]
async fn selecting_a_radio_unchecks_its_siblings() {
    let vault = MockVault::new();
    let page = page(&vault, &["#basic", "#pro"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();

    let make = |tier: &str| {
        let element = container
            .create(
                "radio",
                ElementOptions {
                    value: Some(tier.into()),
                    ..ElementOptions::named("plan.tier")
                },
            )
            .unwrap();
        element.mount(format!("#{tier}")).unwrap();
        element
    };
    let basic = make("basic");
    let pro = make("pro");
    page.settle().await;

    let widget = |name: &str| page.collect_frame(name).unwrap().element().unwrap();
    widget(basic.frame_name()).select();
    assert!(widget(basic.frame_name()).is_checked());

    widget(pro.frame_name()).select();
    assert!(widget(pro.frame_name()).is_checked());
    assert!(!widget(basic.frame_name()).is_checked());

    // Radios are not sensitive, so the page sees the group's value.
    assert_eq!(pro.get_state().value.as_deref(), Some("pro"));
}

// =============================================================================
// Options, validation and events
// =============================================================================

#[tokio::test]
async fn last_custom_validation_wins() {
    let vault = MockVault::new();
    let page = page(&vault, &["#code"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let code = container
        .create(
            "text",
            ElementOptions {
                validation: Some(vec!["^[0-9]+$".into(), "^[a-z]+$".into()]),
                ..ElementOptions::named("promo.code")
            },
        )
        .unwrap();
    code.mount("#code").unwrap();
    page.settle().await;
    let widget = page.collect_frame(code.frame_name()).unwrap().element().unwrap();

    widget.input("abc");
    assert!(code.get_state().is_valid);
    widget.input("123");
    assert!(!code.get_state().is_valid);
}

#[tokio::test]
async fn update_reaches_the_frame() {
    let vault = MockVault::new();
    let page = page(&vault, &["#name"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let holder = container
        .create("cardholder_name", ElementOptions::named("cards.holder"))
        .unwrap();
    holder.mount("#name").unwrap();
    page.settle().await;

    holder.update(&json!({"placeholder": "Name on card"})).unwrap();
    let widget = page.collect_frame(holder.frame_name()).unwrap().element().unwrap();
    assert_eq!(
        widget.current_options().placeholder.as_deref(),
        Some("Name on card")
    );
    assert_eq!(
        holder.get_options().placeholder.as_deref(),
        Some("Name on card")
    );

    // The column an element collects into is fixed at creation.
    let err = holder.update(&json!({"name": "cards.other"})).unwrap_err();
    assert!(matches!(err, SdkError::InvalidElementOptions(_)), "{err:?}");
    assert_eq!(holder.name(), "cards.holder");
}

#[tokio::test]
async fn host_focus_round_trips_through_the_frame() {
    let vault = MockVault::new();
    let page = page(&vault, &["#ssn"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let ssn = container.create("ssn", ElementOptions::named("people.ssn")).unwrap();
    ssn.mount("#ssn").unwrap();
    page.settle().await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let log = events.clone();
    let _focus = ssn
        .on("FOCUS", move |state| {
            log.lock().unwrap().push(("focus", state.is_focused));
        })
        .unwrap();
    let log = events.clone();
    let _blur = ssn.on_event(ElementEvent::Blur, move |state| {
        log.lock().unwrap().push(("blur", state.is_focused));
    });

    ssn.focus();
    assert!(ssn.get_state().is_focused);
    assert!(page
        .collect_frame(ssn.frame_name())
        .unwrap()
        .element()
        .unwrap()
        .is_focused());

    ssn.blur();
    assert!(!ssn.get_state().is_focused);
    assert_eq!(
        *events.lock().unwrap(),
        vec![("focus", true), ("blur", false)]
    );

    assert!(ssn.on("HOVER", |_| {}).is_err());
}

#[tokio::test]
async fn sensitive_values_never_reach_the_page() {
    let vault = MockVault::new();
    let page = page(&vault, &["#ssn"]);
    let sdk = sdk(&page);
    let container = sdk.collect_container().unwrap();
    let ssn = container.create("ssn", ElementOptions::named("people.ssn")).unwrap();
    ssn.mount("#ssn").unwrap();
    page.settle().await;

    let values = Arc::new(Mutex::new(Vec::new()));
    let log = values.clone();
    let _change = ssn
        .on("CHANGE", move |state| log.lock().unwrap().push(state.value.clone()))
        .unwrap();

    let widget = page.collect_frame(ssn.frame_name()).unwrap().element().unwrap();
    widget.input("123456789");
    assert_eq!(widget.display_value(), "123-45-6789");
    assert!(ssn.get_state().is_complete);
    assert!(values.lock().unwrap().iter().all(Option::is_none));
}
