// Date matching and next-occurrence calculation for trigger items
//
// A trigger is due on a date when any of its four rule evaluators matches.
// The next-occurrence search is a deliberate day-by-day scan bounded by the
// item's validity window; the window is calendar-bounded, so the scan is too.

use crate::errors::TriggerError;
use crate::models::{
    local_now, weekday_index, DayOccurrence, Dispatch, DirectDispatch, HandlerResult, TriggerItem,
    LAST_DAY_OF_MONTH, NEVER, NEVER_DATE,
};
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};

/// Last calendar day of `date`'s month.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next_month| next_month.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// 1-based ordinal of `date`'s weekday within its month: 1 for the first
/// Monday of a month, 2 for the second, and so on.
pub fn weekday_occurrence_in_month(date: NaiveDate) -> u32 {
    date.day0() / 7 + 1
}

/// True when no further occurrence of `date`'s weekday remains in the
/// month, i.e. advancing seven days lands in the next month.
pub fn is_last_weekday_in_month(date: NaiveDate) -> bool {
    match date.checked_add_days(Days::new(7)) {
        Some(ahead) => (ahead.year(), ahead.month()) != (date.year(), date.month()),
        None => true,
    }
}

impl TriggerItem {
    fn in_window(&self, date: NaiveDate) -> bool {
        date >= self.start_date() && date <= self.end_date()
    }

    fn matches_one_time(&self, date: NaiveDate) -> bool {
        // The one-shot rule deliberately ignores the validity window.
        let one_time = &self.settings().one_time;
        one_time.active && date == one_time.date
    }

    fn matches_daily(&self, date: NaiveDate) -> bool {
        if !self.in_window(date) {
            return false;
        }
        let interval = self.settings().daily.interval;
        if interval == 0 {
            return false;
        }
        let elapsed = (date - self.start_date()).num_days();
        elapsed % i64::from(interval) == 0
    }

    fn matches_weekly(&self, date: NaiveDate) -> bool {
        if !self.in_window(date) {
            return false;
        }
        self.settings().weekly.days_of_week[weekday_index(date.weekday())]
    }

    fn matches_monthly(&self, date: NaiveDate) -> bool {
        if !self.in_window(date) {
            return false;
        }
        let monthly = &self.settings().monthly;
        if !monthly.months[date.month0() as usize] {
            return false;
        }

        let mut due = false;
        if monthly.days_of_month[LAST_DAY_OF_MONTH] {
            due = date == last_day_of_month(date);
        }
        due = due || monthly.days_of_month[date.day0() as usize];

        let rule = &monthly.weekday_rule;
        if rule.days_of_week[weekday_index(date.weekday())] {
            if rule.occurrences[DayOccurrence::Last as usize] {
                due = due || is_last_weekday_in_month(date);
            }
            // The fifth occurrence of a weekday indexes the "last" slot.
            let ordinal = weekday_occurrence_in_month(date);
            due = due || rule.occurrences[ordinal as usize - 1];
        }
        due
    }

    /// True when `date` is due under any of the four rules. Pure function of
    /// the settings and the validity window; neither the current time nor
    /// the enabled flag is consulted.
    pub fn check_date(&self, date: NaiveDate) -> bool {
        self.matches_one_time(date)
            || self.matches_daily(date)
            || self.matches_weekly(date)
            || self.matches_monthly(date)
    }

    /// Scan forward from `from` for the next due date. The first candidate
    /// is `from`'s own date unless its time-of-day is already past the
    /// trigger time. Returns [`NEVER_DATE`] when nothing matches up to and
    /// including the end date.
    pub fn find_next_trigger_date(&self, from: NaiveDateTime) -> NaiveDate {
        let mut date = from.date();
        if from.time() > self.trigger_time() {
            date = match date.succ_opt() {
                Some(next) => next,
                None => return NEVER_DATE,
            };
        }
        while date <= self.end_date() {
            if self.check_date(date) {
                return date;
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => return NEVER_DATE,
            };
        }
        NEVER_DATE
    }

    /// The next due instant: the cached next date composed with the trigger
    /// time, or [`NEVER`] while disabled or exhausted.
    pub fn next_trigger_datetime(&self) -> NaiveDateTime {
        if !self.enabled() || self.next_trigger_date == NEVER_DATE {
            return NEVER;
        }
        self.next_trigger_date.and_time(self.trigger_time())
    }

    /// Enable or disable the trigger. Enabling computes the next occurrence
    /// from the current moment; disabling resets it to never.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.set_enabled_at(enabled, local_now());
    }

    /// Like [`set_enabled`](Self::set_enabled) with an explicit "now",
    /// which also makes the recompute deterministic under test.
    pub fn set_enabled_at(&mut self, enabled: bool, now: NaiveDateTime) {
        self.set_enabled_flag(enabled);
        self.next_trigger_date = if enabled {
            self.find_next_trigger_date(now)
        } else {
            NEVER_DATE
        };
    }

    /// Evaluate the trigger against `now`, invoking the callback inline.
    pub fn run_check(&mut self, now: NaiveDateTime) -> Result<bool, TriggerError> {
        self.run_check_via(now, &DirectDispatch)
    }

    /// Evaluate the trigger against `now`. Fires when `now` falls inside
    /// `[due, due + hit_window]`: the cached next date is advanced first
    /// (starting one day past the firing occurrence, so a repeated check in
    /// the same window cannot fire twice), then the callback runs through
    /// `dispatch`. Returns `Ok(true)` on a fire; a callback failure still
    /// consumes the occurrence and surfaces as `Err`. A window that was
    /// polled too late is dropped, never re-attempted.
    pub fn run_check_via(
        &mut self,
        now: NaiveDateTime,
        dispatch: &dyn Dispatch,
    ) -> Result<bool, TriggerError> {
        if now == NEVER || !self.enabled() {
            return Ok(false);
        }
        let due = self.next_trigger_datetime();
        let window_end = due.checked_add_signed(self.hit_window).unwrap_or(NEVER);
        if now < due || now > window_end {
            return Ok(false);
        }

        self.next_trigger_date = match self.next_trigger_date.succ_opt() {
            Some(day_after) => self.find_next_trigger_date(day_after.and_time(NaiveTime::MIN)),
            None => NEVER_DATE,
        };

        let mut outcome: HandlerResult = Ok(());
        if let Some(handler) = self.handler.clone() {
            let item: &TriggerItem = self;
            dispatch.dispatch(Box::new(|| outcome = handler.on_trigger(item, due)));
        }
        match outcome {
            Ok(()) => Ok(true),
            Err(source) => Err(TriggerError::Callback {
                tag: self.tag().to_string(),
                source,
            }),
        }
    }
}
