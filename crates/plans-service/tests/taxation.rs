//! Order taxation integration tests against a mocked VIES.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{date, TestHarness};
use plans_core::{BillingInfo, PlansConfig, PlansError, PrincipalId, TaxationPolicyKind};
use plans_service::{
    MemorySessionCache, PlansEngine, RequestContext, RequestScopedCache, ServiceError, TedbClient,
    ViesClient,
};
use plans_store::MemoryStore;

fn eu_config() -> PlansConfig {
    PlansConfig::default().with_taxation(TaxationPolicyKind::Eu, "PL", Some(dec!(23)))
}

fn eu_harness(server: &MockServer, config: PlansConfig) -> TestHarness {
    let vies = ViesClient::new(server.uri(), Duration::from_secs(2)).unwrap();
    TestHarness::with_builder(date(2024, 3, 1), config, |builder| {
        builder.vies(Arc::new(vies))
    })
}

async fn vies_answers(server: &MockServer, country: &str, number: &str, valid: bool) {
    Mock::given(method("POST"))
        .and(path("/check-vat-number"))
        .and(body_json(serde_json::json!({
            "countryCode": country,
            "vatNumber": number
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "countryCode": country,
            "vatNumber": number,
            "valid": valid
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn buyer(harness: &TestHarness, country: &str, tax_number: &str) -> PrincipalId {
    let principal = harness.principal();
    harness.billing(
        &principal,
        &BillingInfo {
            principal: Some(principal),
            name: "ACME".into(),
            street: "Main 1".into(),
            zipcode: "1000".into(),
            city: "Capital".into(),
            country: country.into(),
            tax_number: tax_number.into(),
            ..BillingInfo::default()
        },
    );
    principal
}

#[tokio::test]
async fn valid_eu_company_is_reverse_charged() {
    let server = MockServer::start().await;
    vies_answers(&server, "BE", "0203201340", true).await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "BE", "BE0203201340");

    let order = harness
        .engine
        .create_order(&principal, &plan.id, None, dec!(100), None)
        .await
        .unwrap();

    assert_eq!(order.tax, None);
    assert_eq!(harness.engine.get_order(&order.id).unwrap().tax, None);
}

#[tokio::test]
async fn private_buyer_pays_own_country_rate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "AT", "");

    let order = harness
        .engine
        .create_order(&principal, &plan.id, None, dec!(100), None)
        .await
        .unwrap();

    assert_eq!(order.tax, Some(dec!(20)));
}

#[tokio::test]
async fn invalid_number_pays_buyer_country_rate() {
    let server = MockServer::start().await;
    vies_answers(&server, "DE", "123456789", false).await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "DE", "DE123456789");

    let order = harness
        .engine
        .create_order(&principal, &plan.id, None, dec!(100), None)
        .await
        .unwrap();

    assert_eq!(order.tax, Some(dec!(19)));
}

#[tokio::test]
async fn failed_lookup_only_overrides_tax_when_asked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check-vat-number"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "DE", "DE123456789");
    let order = harness.order(&principal, &plan, None, dec!(100));

    let kept = harness
        .engine
        .recalculate_order(&order.id, None, false)
        .await
        .unwrap();
    assert_eq!(kept.tax, None);

    let fallback = harness
        .engine
        .recalculate_order(&order.id, None, true)
        .await
        .unwrap();
    assert_eq!(fallback.tax, Some(dec!(19)));
    assert_eq!(harness.engine.get_order(&order.id).unwrap().tax, Some(dec!(19)));
}

#[tokio::test]
async fn fallback_rate_is_not_cached_in_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check-vat-number"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "DE", "DE123456789");
    let order = harness.order(&principal, &plan, None, dec!(100));

    let session = Arc::new(MemorySessionCache::default());
    let ctx = RequestContext::with_session(session.clone());
    for _ in 0..2 {
        let order = harness
            .engine
            .recalculate_order(&order.id, Some(&ctx), false)
            .await
            .unwrap();
        assert_eq!(order.tax, None);
        assert_eq!(session.get("tax_DE123456789_DE"), None);
    }
    assert_eq!(harness.engine.get_order(&order.id).unwrap().tax, None);
}

#[tokio::test]
async fn unreachable_rate_service_keeps_known_tax() {
    let vies = MockServer::start().await;
    let tedb = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&tedb)
        .await;
    let rates = TedbClient::new(tedb.uri(), Duration::from_secs(2)).unwrap();
    let vies_client = ViesClient::new(vies.uri(), Duration::from_secs(2)).unwrap();
    let harness = TestHarness::with_builder(date(2024, 3, 1), eu_config(), |builder| {
        builder.vies(Arc::new(vies_client)).rates(Arc::new(rates))
    });
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "AT", "");
    let order = harness.order(&principal, &plan, None, dec!(100));

    let kept = harness
        .engine
        .recalculate_order(&order.id, None, false)
        .await
        .unwrap();
    assert_eq!(kept.tax, None);

    // The failure is remembered, so the embedded rate is used without asking again.
    let fallback = harness
        .engine
        .recalculate_order(&order.id, None, true)
        .await
        .unwrap();
    assert_eq!(fallback.tax, Some(dec!(20)));
}

#[tokio::test]
async fn session_caches_rates_per_buyer() {
    let server = MockServer::start().await;
    vies_answers(&server, "BE", "0203201340", true).await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "BE", "BE0203201340");

    let session = Arc::new(MemorySessionCache::default());
    let ctx = RequestContext::with_session(session.clone());
    for _ in 0..2 {
        let order = harness
            .engine
            .create_order(&principal, &plan.id, None, dec!(100), Some(&ctx))
            .await
            .unwrap();
        assert_eq!(order.tax, None);
    }

    assert_eq!(session.get("tax_BE0203201340_BE").as_deref(), Some("None"));
}

#[tokio::test]
async fn cached_rate_is_used_without_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = buyer(&harness, "DE", "DE123456789");
    let order = harness.order(&principal, &plan, None, dec!(100));

    let session = Arc::new(MemorySessionCache::default());
    session.set("tax_DE123456789_DE", "7".into());
    let ctx = RequestContext::with_session(session);

    let order = harness
        .engine
        .recalculate_order(&order.id, Some(&ctx), false)
        .await
        .unwrap();
    assert_eq!(order.tax, Some(dec!(7)));
}

#[tokio::test]
async fn country_falls_back_to_request_then_default() {
    let server = MockServer::start().await;
    let mut config = eu_config();
    config.default_country = Some("DE".into());
    let harness = eu_harness(&server, config);
    let plan = harness.plan("Basic");
    let principal = harness.principal();

    let from_request = harness
        .engine
        .create_order(
            &principal,
            &plan.id,
            None,
            dec!(100),
            Some(&RequestContext::default().with_country("AT")),
        )
        .await
        .unwrap();
    assert_eq!(from_request.tax, Some(dec!(20)));

    let from_default = harness
        .engine
        .create_order(&principal, &plan.id, None, dec!(100), None)
        .await
        .unwrap();
    assert_eq!(from_default.tax, Some(dec!(19)));
}

#[tokio::test]
async fn unknown_buyer_pays_issuer_rate() {
    let server = MockServer::start().await;
    let harness = eu_harness(&server, eu_config());
    let plan = harness.plan("Basic");
    let principal = harness.principal();

    let order = harness
        .engine
        .create_order(&principal, &plan.id, None, dec!(100), None)
        .await
        .unwrap();
    assert_eq!(order.tax, Some(dec!(23)));
}

#[test]
fn eu_policy_needs_an_eu_issuer() {
    let config =
        PlansConfig::default().with_taxation(TaxationPolicyKind::Eu, "US", Some(dec!(10)));
    let err = PlansEngine::builder(config, Arc::new(MemoryStore::new()))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Plans(PlansError::Configuration(_))
    ));
}
