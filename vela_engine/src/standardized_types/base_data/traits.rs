use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::standardized_types::resolution::Resolution;
use crate::standardized_types::subscriptions::Symbol;
use crate::standardized_types::Price;

/// Common surface over every datum variant.
pub trait BaseData {
    fn symbol(&self) -> &Symbol;

    /// The opening time of the datum in UTC. For point-in-time data this is
    /// the same as the end time.
    fn time_utc(&self) -> DateTime<Utc>;

    /// The closing time of the datum, so for a 1 hour bar opening at 5pm the
    /// end time is 6pm. Within one subscription end times strictly increase
    /// for non-tick resolutions and never decrease for ticks.
    fn time_end_utc(&self) -> DateTime<Utc>;

    fn time_end_local(&self, time_zone: &Tz) -> DateTime<Tz> {
        self.time_end_utc().with_timezone(time_zone)
    }

    /// The representative price of the datum, the close for bars.
    fn value(&self) -> Price;

    fn resolution(&self) -> Resolution;
}
