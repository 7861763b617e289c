//! TEDB `retrieveVatRates` request and response.

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;

use super::client::TedbError;

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SERVICE_NS: &str = "urn:ec.europa.eu:taxud:tedb:services:v1:IVatRetrievalService";
const TYPES_NS: &str = "urn:ec.europa.eu:taxud:tedb:services:v1:IVatRetrievalService:types";

/// SOAP envelope asking for the rates of one member state on one day.
#[must_use]
pub fn retrieve_vat_rates_request(member_state: &str, situation_on: NaiveDate) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="{SOAP_NS}" xmlns:urn="{SERVICE_NS}" xmlns:urn1="{TYPES_NS}"><soapenv:Header/><soapenv:Body><urn:retrieveVatRatesReqMsg><urn1:memberStates><urn1:isoCode>{member_state}</urn1:isoCode></urn1:memberStates><urn1:situationOn>{situation_on}</urn1:situationOn></urn:retrieveVatRatesReqMsg></soapenv:Body></soapenv:Envelope>"#,
        situation_on = situation_on.format("%Y-%m-%d"),
    )
}

/// One `vatRateResults` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VatRateResult {
    /// TEDB member state code (`EL` for Greece).
    pub member_state: String,
    /// Rate category, e.g. `STANDARD` or `REDUCED`.
    pub kind: String,
    /// Rate type, e.g. `DEFAULT` or `REDUCED_RATE`.
    pub rate_kind: String,
    /// Rate in percent as sent, e.g. `21.0`.
    pub value: String,
    /// Regional comment (Madeira, Azores…), if any.
    pub comment: Option<String>,
}

impl VatRateResult {
    fn is_standard_default(&self) -> bool {
        self.kind == "STANDARD" && self.rate_kind == "DEFAULT"
    }
}

/// Parse a `retrieveVatRatesRespMsg` SOAP response.
///
/// # Errors
///
/// Returns [`TedbError::Xml`] for malformed XML and [`TedbError::Fault`] for SOAP faults.
pub fn parse_vat_rates(xml: &str) -> Result<Vec<VatRateResult>, TedbError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut results = Vec::new();
    let mut current: Option<VatRateResult> = None;
    let mut fault: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "vatRateResults" {
                    current = Some(VatRateResult::default());
                } else if name == "Fault" {
                    fault = Some(String::new());
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("vatRateResults") {
                    if let Some(result) = current.take() {
                        results.push(result);
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| TedbError::Xml(e.to_string()))?
                    .into_owned();
                let tail: Vec<&str> = path.iter().rev().take(3).map(String::as_str).collect();
                if let Some(result) = current.as_mut() {
                    match tail.as_slice() {
                        ["memberState", "vatRateResults", ..] => result.member_state = value,
                        ["type", "vatRateResults", ..] => result.kind = value,
                        ["type", "rate", "vatRateResults"] => result.rate_kind = value,
                        ["value", "rate", "vatRateResults"] => result.value = value,
                        ["comment", "vatRateResults", ..] => result.comment = Some(value),
                        _ => {}
                    }
                } else if let (Some(message), Some("faultstring")) =
                    (fault.as_mut(), tail.first().copied())
                {
                    *message = value;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(TedbError::Xml(e.to_string())),
        }
    }

    if !path.is_empty() {
        return Err(TedbError::Xml("unexpected end of document".into()));
    }
    if let Some(message) = fault {
        return Err(TedbError::Fault(message));
    }
    Ok(results)
}

/// Pick the standard rate of `member_state` out of `results`.
///
/// Several STANDARD/DEFAULT entries mean regional rates; the one without a comment is
/// the national rate. If every entry has a comment the highest rate wins.
#[must_use]
pub fn standard_rate(results: &[VatRateResult], member_state: &str) -> Option<Decimal> {
    let candidates: Vec<(Decimal, bool)> = results
        .iter()
        .filter(|r| r.member_state == member_state && r.is_standard_default())
        .filter_map(|r| {
            r.value
                .trim()
                .parse::<Decimal>()
                .ok()
                .map(|rate| (rate, r.comment.as_deref().map_or(true, str::is_empty)))
        })
        .collect();

    candidates
        .iter()
        .find(|(_, national)| *national)
        .map(|(rate, _)| *rate)
        .or_else(|| candidates.iter().map(|(rate, _)| *rate).max())
        .map(|rate| rate.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PORTUGAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">
  <env:Body>
    <ns0:retrieveVatRatesRespMsg xmlns:ns0="urn:ec.europa.eu:taxud:tedb:services:v1:IVatRetrievalService" xmlns:ns1="urn:ec.europa.eu:taxud:tedb:services:v1:IVatRetrievalService:types">
      <ns1:vatRateResults>
        <ns1:memberState>PT</ns1:memberState>
        <ns1:type>STANDARD</ns1:type>
        <ns1:rate><ns1:type>DEFAULT</ns1:type><ns1:value>22.0</ns1:value></ns1:rate>
        <ns1:situationOn>2024-01-01+01:00</ns1:situationOn>
        <ns1:comment>Madeira</ns1:comment>
      </ns1:vatRateResults>
      <ns1:vatRateResults>
        <ns1:memberState>PT</ns1:memberState>
        <ns1:type>STANDARD</ns1:type>
        <ns1:rate><ns1:type>DEFAULT</ns1:type><ns1:value>23.0</ns1:value></ns1:rate>
        <ns1:situationOn>2024-01-01+01:00</ns1:situationOn>
      </ns1:vatRateResults>
      <ns1:vatRateResults>
        <ns1:memberState>PT</ns1:memberState>
        <ns1:type>REDUCED</ns1:type>
        <ns1:rate><ns1:type>REDUCED_RATE</ns1:type><ns1:value>6.0</ns1:value></ns1:rate>
        <ns1:situationOn>2024-01-01+01:00</ns1:situationOn>
      </ns1:vatRateResults>
    </ns0:retrieveVatRatesRespMsg>
  </env:Body>
</env:Envelope>"#;

    #[test]
    fn parses_all_entries() {
        let results = parse_vat_rates(PORTUGAL).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].comment.as_deref(), Some("Madeira"));
        assert_eq!(results[2].kind, "REDUCED");
        assert_eq!(results[2].rate_kind, "REDUCED_RATE");
    }

    #[test]
    fn prefers_entry_without_comment() {
        let results = parse_vat_rates(PORTUGAL).unwrap();
        assert_eq!(standard_rate(&results, "PT"), Some(dec!(23)));
        assert_eq!(standard_rate(&results, "ES"), None);
    }

    #[test]
    fn highest_rate_when_all_commented() {
        let results = vec![
            VatRateResult {
                member_state: "XX".into(),
                kind: "STANDARD".into(),
                rate_kind: "DEFAULT".into(),
                value: "16.0".into(),
                comment: Some("north".into()),
            },
            VatRateResult {
                member_state: "XX".into(),
                kind: "STANDARD".into(),
                rate_kind: "DEFAULT".into(),
                value: "21.50".into(),
                comment: Some("south".into()),
            },
        ];
        let rate = standard_rate(&results, "XX").unwrap();
        assert_eq!(rate, dec!(21.5));
        assert_eq!(rate.to_string(), "21.5");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(matches!(
            parse_vat_rates("<a><b></a>"),
            Err(TedbError::Xml(_))
        ));
        assert!(matches!(
            parse_vat_rates("<a><b>"),
            Err(TedbError::Xml(_))
        ));
    }

    #[test]
    fn soap_fault_is_an_error() {
        let xml = r#"<env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"><env:Body><env:Fault><faultcode>env:Server</faultcode><faultstring>TEDB-100</faultstring></env:Fault></env:Body></env:Envelope>"#;
        assert!(matches!(parse_vat_rates(xml), Err(TedbError::Fault(ref m)) if m == "TEDB-100"));
    }

    #[test]
    fn request_names_member_state_and_day() {
        let body = retrieve_vat_rates_request("EL", NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert!(body.contains("<urn1:isoCode>EL</urn1:isoCode>"));
        assert!(body.contains("<urn1:situationOn>2024-03-05</urn1:situationOn>"));
    }
}
