use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::wizard::catalog::{
    bundled_options, default_message, Locale, MessageCatalogResolver, OptionCatalogClient,
};

const TTL: Duration = Duration::from_secs(60);

fn client(
    source: ScriptedOptions,
) -> (OptionCatalogClient<Arc<ScriptedOptions>>, Arc<ScriptedOptions>) {
    let source = Arc::new(source);
    (
        OptionCatalogClient::new(Arc::clone(&source), TTL, Locale::default()),
        source,
    )
}

#[test]
fn locale_tags_are_normalized() {
    assert_eq!(Locale::new(" HE ").as_str(), "he");
    assert_eq!(Locale::new(""), Locale::default());
    assert_eq!(Locale::default().to_string(), "en");
}

#[tokio::test]
async fn options_are_fetched_once_and_served_from_cache() {
    let (client, source) = client(ScriptedOptions::default());
    let en = Locale::new("en");

    let first = client.get_options("mortgage_step1", "property_ownership", &en).await;
    let second = client.get_options("mortgage_step1", "property_ownership", &en).await;

    assert_eq!(first, second);
    assert_eq!(first.options.len(), 2);
    assert!(!first.loading && !first.stale && first.error.is_none());
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_requested_locale_wins_regardless_of_completion_order() {
    let source = ScriptedOptions::default()
        .with_delay("en", Duration::from_millis(200))
        .with_delay("he", Duration::from_millis(50));
    let (client, _) = client(source);
    let (en, he) = (Locale::new("en"), Locale::new("he"));

    let (from_en, from_he) = tokio::join!(
        client.get_options("mortgage_step1", "property_ownership", &en),
        client.get_options("mortgage_step1", "property_ownership", &he),
    );

    assert!(from_en.superseded);
    assert!(!from_he.superseded);
    assert_eq!(client.active_locale(), he);
    assert!(client
        .cached("mortgage_step1", "property_ownership", &en)
        .is_none());
    let cached = client
        .cached("mortgage_step1", "property_ownership", &he)
        .expect("he cached");
    assert_eq!(cached.options[0].label, "he first");
    assert_eq!(client.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_stale_locale_cannot_overwrite_when_it_lands_last() {
    let source = ScriptedOptions::default()
        .with_delay("en", Duration::from_millis(50))
        .with_delay("he", Duration::from_millis(200));
    let (client, _) = client(source);
    let (en, he) = (Locale::new("en"), Locale::new("he"));

    let (from_en, from_he) = tokio::join!(
        client.get_options("mortgage_step1", "property_ownership", &en),
        client.get_options("mortgage_step1", "property_ownership", &he),
    );

    assert!(from_en.superseded);
    assert!(!from_he.superseded);
    assert!(client
        .cached("mortgage_step1", "property_ownership", &en)
        .is_none());
    assert!(client
        .cached("mortgage_step1", "property_ownership", &he)
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_served_stale_and_refreshed() {
    let (client, source) = client(ScriptedOptions::default());
    let en = Locale::new("en");

    client.get_options("credit_step1", "purpose_of_loan", &en).await;
    tokio::time::advance(TTL + Duration::from_secs(1)).await;

    let stale = client.get_options("credit_step1", "purpose_of_loan", &en).await;
    assert!(stale.stale);
    assert_eq!(stale.label.as_deref(), Some("credit_step1/purpose_of_loan (en) #1"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let fresh = client.get_options("credit_step1", "purpose_of_loan", &en).await;
    assert!(!fresh.stale);
    assert_eq!(fresh.label.as_deref(), Some("credit_step1/purpose_of_loan (en) #2"));
}

#[tokio::test]
async fn failures_fall_back_to_bundled_tables() {
    let (client, source) = client(ScriptedOptions::default());
    source.fail.store(true, Ordering::SeqCst);
    let en = Locale::new("en");

    let view = client.get_options("mortgage_step1", "property_ownership", &en).await;
    assert!(view.error.is_some());
    assert_eq!(view.options.len(), 3);
    assert_eq!(view.options[0].value, "option_1");
    assert!(client.is_empty());

    let unknown = client.get_options("mortgage_step9", "nothing", &en).await;
    assert!(unknown.error.is_some());
    assert!(unknown.options.is_empty());
}

#[tokio::test]
async fn locale_change_and_clear_invalidate_the_cache() {
    let (client, source) = client(ScriptedOptions::default());
    let (en, he) = (Locale::new("en"), Locale::new("he"));

    client.get_options("mortgage_step1", "property_ownership", &en).await;
    client.set_locale(&he);
    assert!(client.is_empty());

    client.get_options("mortgage_step1", "property_ownership", &he).await;
    client.clear();
    assert!(client.is_empty());
    client.get_options("mortgage_step1", "property_ownership", &he).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn peek_without_a_runtime_serves_bundled_data_as_loading() {
    let (client, source) = client(ScriptedOptions::default());
    let view = client.peek("mortgage_step1", "property_ownership", &Locale::new("ru"));

    assert!(view.loading);
    assert_eq!(view.options.len(), 3);
    assert_eq!(view.label.as_deref(), Some("Property ownership"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn bundled_tables_fall_back_to_english() {
    let set = bundled_options("mortgage_step3", "main_source_of_income", &Locale::new("he"))
        .expect("bundled table");
    assert!(!set.options.is_empty());
    assert!(bundled_options("nowhere", "nothing", &Locale::default()).is_none());
}

#[test]
fn messages_resolve_synchronously_before_any_catalog_loads() {
    let resolver =
        MessageCatalogResolver::new(Arc::new(ScriptedMessages::default()), Locale::default());
    let he = Locale::new("he");

    assert_eq!(
        resolver.get_error_message("error_fill_field", &he),
        default_message("error_fill_field").expect("default text")
    );
    assert_eq!(resolver.get_error_message("error_unheard_of", &he), "error_unheard_of");
    assert!(!resolver.is_loaded(&he));
}

#[tokio::test]
async fn loaded_catalog_text_takes_precedence() {
    let source = Arc::new(ScriptedMessages::default());
    let resolver = MessageCatalogResolver::new(Arc::clone(&source), Locale::default());
    let he = Locale::new("he");

    assert_eq!(resolver.refresh(&he).await, Ok(1));
    assert_eq!(resolver.get_error_message("error_fill_field", &he), "[he] required");
    assert_eq!(
        resolver.get_error_message("error_min_value", &he),
        default_message("error_min_value").expect("default text")
    );

    let messages = resolver.messages_for(["error_fill_field", "error_min_value"], &he);
    assert_eq!(messages.len(), 2);

    resolver.clear();
    assert!(!resolver.is_loaded(&he));
}

#[tokio::test(start_paused = true)]
async fn superseded_message_catalog_is_discarded() {
    let source = ScriptedMessages::default()
        .with_delay("en", Duration::from_millis(200))
        .with_delay("he", Duration::from_millis(50));
    let resolver = MessageCatalogResolver::new(Arc::new(source), Locale::default());
    let (en, he) = (Locale::new("en"), Locale::new("he"));

    let (from_en, from_he) = tokio::join!(resolver.refresh(&en), resolver.refresh(&he));

    assert_eq!(from_en, Ok(0));
    assert_eq!(from_he, Ok(1));
    assert!(!resolver.is_loaded(&en));
    assert!(resolver.is_loaded(&he));
}

#[tokio::test]
async fn message_source_failures_keep_defaults() {
    let resolver = MessageCatalogResolver::new(Arc::new(failing_messages()), Locale::default());
    let en = Locale::default();

    assert!(resolver.refresh(&en).await.is_err());
    assert_eq!(
        resolver.get_error_message("error_fill_field", &en),
        default_message("error_fill_field").expect("default text")
    );
}

#[tokio::test(start_paused = true)]
async fn failed_message_fetch_is_not_retried_on_every_lookup() {
    let source = Arc::new(failing_messages());
    let resolver = MessageCatalogResolver::new(Arc::clone(&source), Locale::default());
    let he = Locale::new("he");

    for _ in 0..20 {
        assert_eq!(
            resolver.get_error_message("error_fill_field", &he),
            default_message("error_fill_field").expect("default text")
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let _ = resolver.messages_for(["error_fill_field", "error_min_value"], &he);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    source.fail.store(false, Ordering::SeqCst);
    assert_eq!(resolver.refresh(&he).await, Ok(1));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(resolver.get_error_message("error_fill_field", &he), "[he] required");

    source.fail.store(true, Ordering::SeqCst);
    resolver.clear();
    let _ = resolver.get_error_message("error_fill_field", &he);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}
