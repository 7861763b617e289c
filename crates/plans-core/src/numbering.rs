//! Invoice number sequences.
//!
//! Every `(invoice type, period bucket)` pair owns one gap-free counter. The bucket comes
//! from the configured [`CounterReset`]; the counter starts one above the highest number
//! already issued in that bucket so that legacy invoices keep their numbers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::error::PlansError;
use crate::invoice::{Invoice, InvoiceType};

/// Custom bucketing: returns `(bucket_key, initial_number)` for an invoice being numbered.
pub type CustomBucketFn = dyn Fn(&Invoice) -> (String, i64) + Send + Sync;

/// When invoice numbering restarts.
#[derive(Clone, Default)]
pub enum CounterReset {
    /// Every day, bucket `YYYY_M_D`.
    Daily,
    /// Every month, bucket `YYYY_M`.
    #[default]
    Monthly,
    /// Every year, bucket `YYYY`.
    Annually,
    /// Caller-defined bucket and initial number.
    Custom(Arc<CustomBucketFn>),
}

impl fmt::Debug for CounterReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CounterReset {
    type Err = PlansError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            "annually" | "yearly" => Ok(Self::Annually),
            other => Err(PlansError::Configuration(format!(
                "unknown invoice counter reset: {other}"
            ))),
        }
    }
}

impl CounterReset {
    /// Lower-case name used in sequence keys.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Annually => "annually",
            Self::Custom(_) => "custom",
        }
    }

    /// Bucket key of a built-in reset for `issued`; `None` for [`CounterReset::Custom`].
    #[must_use]
    pub fn bucket(&self, issued: NaiveDate) -> Option<String> {
        match self {
            Self::Daily => Some(format!(
                "{}_{}_{}",
                issued.year(),
                issued.month(),
                issued.day()
            )),
            Self::Monthly => Some(format!("{}_{}", issued.year(), issued.month())),
            Self::Annually => Some(issued.year().to_string()),
            Self::Custom(_) => None,
        }
    }
}

/// Where the number of an invoice comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberAllocation {
    /// Counter key, e.g. `invoice_numbers_INVOICE_monthly_2012_1`.
    pub sequence_key: String,
    /// Bucket key within the invoice type.
    pub bucket: String,
    /// Value the counter takes on first use.
    pub initial: i64,
}

impl NumberAllocation {
    /// Plan the allocation of `invoice`'s number.
    ///
    /// `existing` are previously issued invoices; only those of the same type and bucket
    /// (and not `invoice` itself) raise the initial number.
    #[must_use]
    pub fn for_invoice<'a>(
        reset: &CounterReset,
        invoice: &Invoice,
        existing: impl IntoIterator<Item = &'a Invoice>,
    ) -> Self {
        let (bucket, initial) = match reset {
            CounterReset::Custom(bucket_fn) => bucket_fn(invoice),
            builtin => {
                let bucket = builtin.bucket(invoice.issued).unwrap_or_default();
                let highest = existing
                    .into_iter()
                    .filter(|other| other.id != invoice.id && other.kind == invoice.kind)
                    .filter(|other| builtin.bucket(other.issued).as_deref() == Some(&bucket))
                    .map(|other| other.number)
                    .max()
                    .unwrap_or(0);
                (bucket, highest + 1)
            }
        };
        Self {
            sequence_key: sequence_key(invoice.kind, reset, &bucket),
            bucket,
            initial,
        }
    }
}

/// Counter key of `(kind, reset, bucket)`.
#[must_use]
pub fn sequence_key(kind: InvoiceType, reset: &CounterReset, bucket: &str) -> String {
    format!("invoice_numbers_{}_{}_{bucket}", kind.as_str(), reset.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingInfo;
    use crate::invoice::Party;
    use crate::order::Order;
    use crate::{PlanId, PrincipalId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn invoice(kind: InvoiceType, issued: NaiveDate, number: i64) -> Invoice {
        let order = Order::new(
            PrincipalId::generate(),
            PlanId::generate(),
            None,
            dec!(10),
            "EUR",
            Utc::now(),
        );
        let mut invoice = Invoice::from_order(
            &order,
            kind,
            issued,
            "",
            &BillingInfo::default(),
            Party::default(),
        );
        invoice.number = number;
        invoice
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bucket_keys_are_not_zero_padded() {
        let date = day(2012, 1, 4);
        assert_eq!(CounterReset::Daily.bucket(date).unwrap(), "2012_1_4");
        assert_eq!(CounterReset::Monthly.bucket(date).unwrap(), "2012_1");
        assert_eq!(CounterReset::Annually.bucket(date).unwrap(), "2012");
    }

    #[test]
    fn first_invoice_of_a_month_starts_at_one() {
        let fresh = invoice(InvoiceType::Invoice, day(2012, 1, 14), 0);
        let allocation = NumberAllocation::for_invoice(&CounterReset::Monthly, &fresh, []);
        assert_eq!(allocation.sequence_key, "invoice_numbers_INVOICE_monthly_2012_1");
        assert_eq!(allocation.initial, 1);
    }

    #[test]
    fn legacy_numbers_in_the_same_bucket_raise_initial() {
        let fresh = invoice(InvoiceType::Invoice, day(2012, 1, 14), 0);
        let existing = [
            invoice(InvoiceType::Invoice, day(2012, 1, 2), 41),
            invoice(InvoiceType::Invoice, day(2011, 12, 30), 90),
            invoice(InvoiceType::Proforma, day(2012, 1, 3), 70),
        ];
        let allocation =
            NumberAllocation::for_invoice(&CounterReset::Monthly, &fresh, existing.iter());
        assert_eq!(allocation.initial, 42);

        let yearly =
            NumberAllocation::for_invoice(&CounterReset::Annually, &fresh, existing.iter());
        assert_eq!(yearly.sequence_key, "invoice_numbers_INVOICE_annually_2012");
        assert_eq!(yearly.initial, 42);
    }

    #[test]
    fn custom_reset_supplies_bucket_and_initial() {
        let reset = CounterReset::Custom(Arc::new(|invoice: &Invoice| {
            (format!("q{}", invoice.issued.month0() / 3 + 1), 100)
        }));
        let fresh = invoice(InvoiceType::Proforma, day(2012, 5, 1), 0);
        let allocation = NumberAllocation::for_invoice(&reset, &fresh, []);
        assert_eq!(allocation.sequence_key, "invoice_numbers_PROFORMA_custom_q2");
        assert_eq!(allocation.initial, 100);
    }

    #[test]
    fn counter_reset_parses_names() {
        assert_eq!("MONTHLY".parse::<CounterReset>().unwrap().name(), "monthly");
        assert_eq!("yearly".parse::<CounterReset>().unwrap().name(), "annually");
        assert!("weekly".parse::<CounterReset>().is_err());
    }
}
