// Trigger data model: settings, items, collection, and callback seams

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sentinel date meaning "no future occurrence" or "disabled".
pub const NEVER_DATE: NaiveDate = NaiveDate::MAX;

/// Sentinel instant meaning "never".
pub const NEVER: NaiveDateTime = NaiveDateTime::MAX;

/// Index into `MonthlySettings::days_of_month` meaning "last day of the month".
pub const LAST_DAY_OF_MONTH: usize = 31;

// Helper modules for the fixed document formats (yyyy-MM-dd / HH:mm:ss).
// A malformed string is a hard deserialization error, never a default.
pub(crate) mod date_format {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod time_format {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Current wall-clock moment as a naive local datetime.
pub(crate) fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Flag index for a weekday. Sunday is 0, matching the stored flag layout.
pub(crate) fn weekday_index(weekday: Weekday) -> usize {
    weekday.num_days_from_sunday() as usize
}

/// Which occurrence of a weekday within a month a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOccurrence {
    First = 0,
    Second = 1,
    Third = 2,
    Fourth = 3,
    Last = 4,
}

/// One-shot rule: fires exactly once on an exact date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeSettings {
    #[serde(with = "date_format")]
    pub date: NaiveDate,
    pub active: bool,
}

impl Default for OneTimeSettings {
    fn default() -> Self {
        Self {
            date: NaiveDate::MIN,
            active: false,
        }
    }
}

/// Daily rule: fires every `interval` days counted from the item's start
/// date. An interval of 0 never fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySettings {
    pub interval: u32,
}

/// Weekly rule: fires on any flagged weekday, every week.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySettings {
    pub days_of_week: [bool; 7],
}

impl WeeklySettings {
    pub fn day(&self, weekday: Weekday) -> bool {
        self.days_of_week[weekday_index(weekday)]
    }

    pub fn set_day(&mut self, weekday: Weekday, active: bool) {
        self.days_of_week[weekday_index(weekday)] = active;
    }
}

/// Weekday-occurrence part of the monthly rule, e.g. "first Monday" or
/// "last Friday".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyWeekdayRule {
    pub occurrences: [bool; 5],
    pub days_of_week: [bool; 7],
}

impl MonthlyWeekdayRule {
    pub fn set_occurrence(&mut self, occurrence: DayOccurrence, active: bool) {
        self.occurrences[occurrence as usize] = active;
    }

    pub fn set_day(&mut self, weekday: Weekday, active: bool) {
        self.days_of_week[weekday_index(weekday)] = active;
    }
}

/// Monthly rule: within a flagged month, fires on a flagged day-of-month
/// (index 31 means "last day of the month") or on a flagged weekday
/// occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySettings {
    pub months: [bool; 12],
    pub days_of_month: [bool; 32],
    pub weekday_rule: MonthlyWeekdayRule,
}

impl MonthlySettings {
    pub fn set_month(&mut self, month: chrono::Month, active: bool) {
        self.months[month.number_from_month() as usize - 1] = active;
    }

    /// Flag a calendar day of the month, 1 through 31.
    pub fn set_day_of_month(&mut self, day: u8, active: bool) {
        if (1..=31).contains(&day) {
            self.days_of_month[day as usize - 1] = active;
        }
    }

    /// Flag the "last day of the month" sentinel.
    pub fn set_last_day(&mut self, active: bool) {
        self.days_of_month[LAST_DAY_OF_MONTH] = active;
    }
}

/// The four recurrence sub-configurations of a trigger. They are not
/// mutually exclusive; a date is due if any of them matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub one_time: OneTimeSettings,
    pub daily: DailySettings,
    pub weekly: WeeklySettings,
    pub monthly: MonthlySettings,
}

/// Outcome of a fire callback.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Fire notification callback, invoked synchronously from the poll loop
/// with the item that fired and the due instant it was scheduled for.
pub trait TriggerHandler: Send + Sync {
    fn on_trigger(&self, item: &TriggerItem, due: NaiveDateTime) -> HandlerResult;
}

impl<F> TriggerHandler for F
where
    F: Fn(&TriggerItem, NaiveDateTime) -> HandlerResult + Send + Sync,
{
    fn on_trigger(&self, item: &TriggerItem, due: NaiveDateTime) -> HandlerResult {
        self(item, due)
    }
}

/// Execution-context hook for fire callbacks. The engine routes every
/// callback invocation through its dispatcher, so a host can marshal the
/// work onto a thread of its choosing (e.g. a UI thread). `dispatch` must
/// not return before `work` has run.
pub trait Dispatch: Send + Sync {
    fn dispatch<'a>(&self, work: Box<dyn FnOnce() + Send + 'a>);
}

/// Default dispatcher: runs the callback inline on the caller's thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDispatch;

impl Dispatch for DirectDispatch {
    fn dispatch<'a>(&self, work: Box<dyn FnOnce() + Send + 'a>) {
        work();
    }
}

fn never_date() -> NaiveDate {
    NEVER_DATE
}

fn default_hit_window() -> Duration {
    Duration::seconds(1)
}

/// A single trigger: recurrence settings plus a validity window, a
/// time-of-day, an enabled flag, and the cached next-occurrence date.
///
/// The serialized field order (tag, start_date, end_date, trigger_time,
/// settings, enabled) and the date/time string formats are fixed for
/// round-trip compatibility with existing saved configurations.
#[derive(Clone, Serialize, Deserialize)]
pub struct TriggerItem {
    tag: String,
    #[serde(with = "date_format")]
    start_date: NaiveDate,
    #[serde(with = "date_format")]
    end_date: NaiveDate,
    #[serde(with = "time_format")]
    trigger_time: NaiveTime,
    settings: TriggerSettings,
    enabled: bool,
    #[serde(skip, default = "never_date")]
    pub(crate) next_trigger_date: NaiveDate,
    #[serde(skip, default = "default_hit_window")]
    pub(crate) hit_window: Duration,
    #[serde(skip)]
    pub(crate) handler: Option<Arc<dyn TriggerHandler>>,
}

impl TriggerItem {
    /// Create a disabled trigger with an open validity window and no rules
    /// active.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            start_date: NaiveDate::MIN,
            end_date: NaiveDate::MAX,
            trigger_time: NaiveTime::MIN,
            settings: TriggerSettings::default(),
            enabled: false,
            next_trigger_date: NEVER_DATE,
            hit_window: default_hit_window(),
            handler: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Set the start of the validity window. The end date is pushed forward
    /// if it would otherwise precede the new start.
    pub fn set_start_date(&mut self, date: NaiveDate) {
        self.start_date = date;
        if self.end_date < self.start_date {
            self.end_date = self.start_date;
        }
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Set the end of the validity window, clamped to never precede the
    /// start date.
    pub fn set_end_date(&mut self, date: NaiveDate) {
        self.end_date = date.max(self.start_date);
    }

    pub fn trigger_time(&self) -> NaiveTime {
        self.trigger_time
    }

    pub fn set_trigger_time(&mut self, time: NaiveTime) {
        self.trigger_time = time;
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut TriggerSettings {
        &mut self.settings
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled_flag(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Cached next occurrence date; `NEVER_DATE` while disabled or when no
    /// occurrence remains inside the validity window.
    pub fn next_trigger_date(&self) -> NaiveDate {
        self.next_trigger_date
    }

    /// Window after the exact due instant during which a poll tick still
    /// counts as catching the occurrence.
    pub fn hit_window(&self) -> Duration {
        self.hit_window
    }

    /// Register the fire callback.
    pub fn set_handler(&mut self, handler: Arc<dyn TriggerHandler>) {
        self.handler = Some(handler);
    }
}

impl fmt::Debug for TriggerItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerItem")
            .field("tag", &self.tag)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("trigger_time", &self.trigger_time)
            .field("settings", &self.settings)
            .field("enabled", &self.enabled)
            .field("next_trigger_date", &self.next_trigger_date)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

// Identity compares the persisted fields only; the cached next date and the
// registered handler are runtime state.
impl PartialEq for TriggerItem {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.start_date == other.start_date
            && self.end_date == other.end_date
            && self.trigger_time == other.trigger_time
            && self.settings == other.settings
            && self.enabled == other.enabled
    }
}

/// Ordered, insertion-preserving container of triggers. Uniqueness is not
/// enforced. Serializes as the root listing of trigger item documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerCollection {
    items: Vec<TriggerItem>,
}

impl TriggerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Append an item, returning its index.
    pub fn add(&mut self, item: TriggerItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    /// Append every item of `items`, attaching `handler` to each as it is
    /// added. Used when bulk-loading from a document so the caller regains
    /// fire notifications.
    pub fn add_range(&mut self, items: TriggerCollection, handler: Arc<dyn TriggerHandler>) {
        for mut item in items {
            item.set_handler(Arc::clone(&handler));
            self.add(item);
        }
    }

    pub fn insert(&mut self, index: usize, item: TriggerItem) {
        self.items.insert(index, item);
    }

    /// Remove the first item equal to `item`. Returns true if one was
    /// removed.
    pub fn remove(&mut self, item: &TriggerItem) -> bool {
        match self.index_of(item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<TriggerItem> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn contains(&self, item: &TriggerItem) -> bool {
        self.items.contains(item)
    }

    pub fn index_of(&self, item: &TriggerItem) -> Option<usize> {
        self.items.iter().position(|candidate| candidate == item)
    }

    pub fn get(&self, index: usize) -> Option<&TriggerItem> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TriggerItem> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TriggerItem> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TriggerItem> {
        self.items.iter_mut()
    }
}

impl std::ops::Index<usize> for TriggerCollection {
    type Output = TriggerItem;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl std::ops::IndexMut<usize> for TriggerCollection {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.items[index]
    }
}

impl IntoIterator for TriggerCollection {
    type Item = TriggerItem;
    type IntoIter = std::vec::IntoIter<TriggerItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a TriggerCollection {
    type Item = &'a TriggerItem;
    type IntoIter = std::slice::Iter<'a, TriggerItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a mut TriggerCollection {
    type Item = &'a mut TriggerItem;
    type IntoIter = std::slice::IterMut<'a, TriggerItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn new_item_defaults() {
        let item = TriggerItem::new("backup");
        assert_eq!(item.tag(), "backup");
        assert_eq!(item.start_date(), NaiveDate::MIN);
        assert_eq!(item.end_date(), NaiveDate::MAX);
        assert!(!item.enabled());
        assert_eq!(item.next_trigger_date(), NEVER_DATE);
        assert_eq!(item.hit_window(), Duration::seconds(1));
    }

    #[test]
    fn start_date_pushes_end_date_forward() {
        let mut item = TriggerItem::new("t");
        item.set_end_date(date(2024, 1, 10));
        item.set_start_date(date(2024, 2, 1));
        assert_eq!(item.end_date(), date(2024, 2, 1));
    }

    #[test]
    fn end_date_clamped_to_start() {
        let mut item = TriggerItem::new("t");
        item.set_start_date(date(2024, 6, 15));
        item.set_end_date(date(2024, 6, 1));
        assert_eq!(item.end_date(), date(2024, 6, 15));
    }

    #[test]
    fn weekday_flags_round_trip() {
        let mut weekly = WeeklySettings::default();
        weekly.set_day(Weekday::Sun, true);
        weekly.set_day(Weekday::Sat, true);
        assert!(weekly.days_of_week[0]);
        assert!(weekly.days_of_week[6]);
        assert!(weekly.day(Weekday::Sun));
        assert!(!weekly.day(Weekday::Wed));
    }

    #[test]
    fn monthly_day_setters_use_one_based_days() {
        let mut monthly = MonthlySettings::default();
        monthly.set_day_of_month(1, true);
        monthly.set_day_of_month(31, true);
        monthly.set_day_of_month(0, true);
        monthly.set_day_of_month(32, true);
        assert!(monthly.days_of_month[0]);
        assert!(monthly.days_of_month[30]);
        assert!(!monthly.days_of_month[LAST_DAY_OF_MONTH]);
        monthly.set_last_day(true);
        assert!(monthly.days_of_month[LAST_DAY_OF_MONTH]);
    }

    #[test]
    fn collection_preserves_insertion_order() {
        let mut collection = TriggerCollection::new();
        collection.add(TriggerItem::new("a"));
        collection.add(TriggerItem::new("b"));
        collection.insert(1, TriggerItem::new("c"));
        let tags: Vec<&str> = collection.iter().map(TriggerItem::tag).collect();
        assert_eq!(tags, vec!["a", "c", "b"]);
    }

    #[test]
    fn collection_remove_and_lookup() {
        let mut collection = TriggerCollection::new();
        collection.add(TriggerItem::new("a"));
        collection.add(TriggerItem::new("b"));
        let probe = TriggerItem::new("b");
        assert!(collection.contains(&probe));
        assert_eq!(collection.index_of(&probe), Some(1));
        assert!(collection.remove(&probe));
        assert!(!collection.contains(&probe));
        assert!(!collection.remove(&probe));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn add_range_attaches_handler() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let handler: Arc<dyn TriggerHandler> =
            Arc::new(move |_: &TriggerItem, _: NaiveDateTime| -> HandlerResult {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let mut loaded = TriggerCollection::new();
        loaded.add(TriggerItem::new("a"));
        loaded.add(TriggerItem::new("b"));

        let mut collection = TriggerCollection::new();
        collection.add_range(loaded, handler);
        assert_eq!(collection.len(), 2);
        for item in &collection {
            assert!(item.handler.is_some());
        }
    }
}
