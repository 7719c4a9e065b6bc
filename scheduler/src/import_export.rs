// Trigger document import/export
//
// Converts trigger items and whole collections to and from the textual
// document the host layer persists. The document is JSON with a fixed field
// order per item (tag, start_date, end_date, trigger_time, settings,
// enabled); dates are yyyy-MM-dd strings and the time-of-day is HH:mm:ss,
// so existing saved configurations round-trip unchanged.

use crate::errors::DocumentError;
use crate::models::{local_now, TriggerCollection, TriggerItem};
use chrono::NaiveDateTime;
use tracing::debug;

/// Serialize a single trigger item to a document string.
pub fn export_item(item: &TriggerItem) -> Result<String, DocumentError> {
    Ok(serde_json::to_string_pretty(item)?)
}

/// Parse a single trigger item from a document string. An enabled item has
/// its next occurrence recomputed from the current moment, matching the
/// behavior of enabling it by hand.
pub fn import_item(text: &str) -> Result<TriggerItem, DocumentError> {
    import_item_at(text, local_now())
}

/// [`import_item`] with an explicit "now" for the next-occurrence recompute.
pub fn import_item_at(text: &str, now: NaiveDateTime) -> Result<TriggerItem, DocumentError> {
    let mut item: TriggerItem = serde_json::from_str(text)?;
    item.set_enabled_at(item.enabled(), now);
    Ok(item)
}

/// Serialize a whole collection to a document string, preserving item order.
pub fn export_collection(collection: &TriggerCollection) -> Result<String, DocumentError> {
    let text = serde_json::to_string_pretty(collection)?;
    debug!(items = collection.len(), "exported trigger collection");
    Ok(text)
}

/// Parse a whole collection from a document string. Enabled items have
/// their next occurrences recomputed from the current moment.
pub fn import_collection(text: &str) -> Result<TriggerCollection, DocumentError> {
    import_collection_at(text, local_now())
}

/// [`import_collection`] with an explicit "now" for the recompute.
pub fn import_collection_at(
    text: &str,
    now: NaiveDateTime,
) -> Result<TriggerCollection, DocumentError> {
    let mut collection: TriggerCollection = serde_json::from_str(text)?;
    for item in collection.iter_mut() {
        item.set_enabled_at(item.enabled(), now);
    }
    debug!(items = collection.len(), "imported trigger collection");
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DayOccurrence;
    use chrono::{Month, NaiveDate, NaiveTime, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fully_populated_item() -> TriggerItem {
        let mut item = TriggerItem::new("quarterly-cleanup");
        item.set_start_date(date(2024, 1, 1));
        item.set_end_date(date(2025, 12, 31));
        item.set_trigger_time(NaiveTime::from_hms_opt(6, 45, 30).unwrap());

        let settings = item.settings_mut();
        settings.one_time.active = true;
        settings.one_time.date = date(2024, 3, 5);
        settings.daily.interval = 14;
        settings.weekly.set_day(Weekday::Mon, true);
        settings.weekly.set_day(Weekday::Fri, true);
        settings.monthly.set_month(Month::March, true);
        settings.monthly.set_month(Month::June, true);
        settings.monthly.set_day_of_month(15, true);
        settings.monthly.set_last_day(true);
        settings.monthly.weekday_rule.set_day(Weekday::Tue, true);
        settings
            .monthly
            .weekday_rule
            .set_occurrence(DayOccurrence::Last, true);
        item
    }

    #[test]
    fn item_round_trip_preserves_every_field() {
        let mut item = fully_populated_item();
        item.set_enabled_at(true, date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap());

        let text = export_item(&item).unwrap();
        let restored =
            import_item_at(&text, date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap()).unwrap();

        assert_eq!(restored, item);
        assert_eq!(restored.next_trigger_date(), item.next_trigger_date());
    }

    #[test]
    fn collection_round_trip_preserves_order() {
        let mut collection = TriggerCollection::new();
        collection.add(TriggerItem::new("first"));
        collection.add(fully_populated_item());
        collection.add(TriggerItem::new("third"));

        let text = export_collection(&collection).unwrap();
        let restored = import_collection_at(
            &text,
            date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
        )
        .unwrap();

        assert_eq!(restored.len(), 3);
        assert_eq!(restored[0].tag(), "first");
        assert_eq!(restored[1].tag(), "quarterly-cleanup");
        assert_eq!(restored[2].tag(), "third");
    }

    #[test]
    fn dates_and_times_use_the_fixed_formats() {
        let item = fully_populated_item();
        let text = export_item(&item).unwrap();
        assert!(text.contains("\"2024-01-01\""));
        assert!(text.contains("\"2025-12-31\""));
        assert!(text.contains("\"06:45:30\""));
        assert!(text.contains("\"2024-03-05\""));
    }

    #[test]
    fn item_fields_keep_their_document_order() {
        let text = export_item(&fully_populated_item()).unwrap();
        let positions: Vec<usize> = [
            "\"tag\"",
            "\"start_date\"",
            "\"end_date\"",
            "\"trigger_time\"",
            "\"settings\"",
            "\"enabled\"",
        ]
        .iter()
        .map(|field| text.find(field).unwrap())
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn malformed_date_is_a_parse_error_not_a_default() {
        let text = export_item(&fully_populated_item())
            .unwrap()
            .replace("2024-01-01", "01/01/2024");
        assert!(import_item(&text).is_err());
    }

    #[test]
    fn malformed_time_is_a_parse_error() {
        let text = export_item(&fully_populated_item())
            .unwrap()
            .replace("06:45:30", "6.45 am");
        assert!(import_item(&text).is_err());
    }

    #[test]
    fn truncated_document_is_rejected() {
        let text = export_item(&fully_populated_item()).unwrap();
        assert!(import_item(&text[..text.len() / 2]).is_err());
    }

    #[test]
    fn import_recomputes_next_date_for_enabled_items() {
        let mut item = TriggerItem::new("weekly");
        item.set_start_date(date(2024, 1, 1));
        item.set_end_date(date(2024, 12, 31));
        item.set_trigger_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        item.settings_mut().weekly.set_day(Weekday::Wed, true);
        item.set_enabled_at(true, date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap());

        let text = export_item(&item).unwrap();
        // Loaded later than it was saved: the cache must reflect load time.
        let restored =
            import_item_at(&text, date(2024, 2, 1).and_hms_opt(0, 0, 0).unwrap()).unwrap();
        assert_eq!(restored.next_trigger_date(), date(2024, 2, 7));

        // 2024-01-03 is the first Wednesday of the year.
        assert_eq!(item.next_trigger_date(), date(2024, 1, 3));
    }
}
