use std::fmt;

use serde::{Deserialize, Serialize};

/// An analytics category with its own independent set of metric maps per date.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Unique visitors per day.
    Visitors,
    /// Requested files.
    Requests,
    /// Requested static files, such as images or stylesheets.
    RequestsStatic,
    /// Requests answered with a 404.
    NotFound,
    /// Client hosts.
    Hosts,
    /// Operating systems, grouped by family.
    Os,
    /// Browsers, grouped by family.
    Browsers,
    /// Hits per hour of the day.
    VisitTimes,
    /// Virtual hosts.
    VirtualHosts,
    /// Referring URLs.
    Referrers,
    /// Referring sites.
    ReferringSites,
    /// Search engine keyphrases.
    Keyphrases,
    /// HTTP status codes, grouped by class.
    StatusCodes,
    /// Authenticated remote users.
    RemoteUser,
    /// Cache status of the upstream proxy.
    CacheStatus,
    /// Geographic location, grouped by continent.
    GeoLocation,
}

impl Module {
    /// All modules in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::Visitors,
        Self::Requests,
        Self::RequestsStatic,
        Self::NotFound,
        Self::Hosts,
        Self::Os,
        Self::Browsers,
        Self::VisitTimes,
        Self::VirtualHosts,
        Self::Referrers,
        Self::ReferringSites,
        Self::Keyphrases,
        Self::StatusCodes,
        Self::RemoteUser,
        Self::CacheStatus,
        Self::GeoLocation,
    ];

    /// Returns the position of the module in [`Module::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the snake case name of the module.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visitors => "visitors",
            Self::Requests => "requests",
            Self::RequestsStatic => "requests_static",
            Self::NotFound => "not_found",
            Self::Hosts => "hosts",
            Self::Os => "os",
            Self::Browsers => "browsers",
            Self::VisitTimes => "visit_times",
            Self::VirtualHosts => "virtual_hosts",
            Self::Referrers => "referrers",
            Self::ReferringSites => "referring_sites",
            Self::Keyphrases => "keyphrases",
            Self::StatusCodes => "status_codes",
            Self::RemoteUser => "remote_user",
            Self::CacheStatus => "cache_status",
            Self::GeoLocation => "geo_location",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
