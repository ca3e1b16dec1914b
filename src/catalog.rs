use crate::fuzzy_matcher::FzfMatcher;
use crate::sanitizer::ParamKind;
use std::fmt;
use std::str::FromStr;

/// Resource listing a request falls back to when there is no stored back page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    User,
    Cron,
    Web,
    Dns,
    Mail,
    Database,
    Service,
}

impl Category {
    pub fn listing_page(self) -> &'static str {
        match self {
            Category::User => "/list/user/",
            Category::Cron => "/list/cron/",
            Category::Web => "/list/web/",
            Category::Dns => "/list/dns/",
            Category::Mail => "/list/mail/",
            Category::Database => "/list/db/",
            Category::Service => "/list/server/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Query-string key the value arrives under.
    pub key: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// The object acted on. Leaving it empty asks for nothing to be done.
    pub gate: bool,
}

const fn req(key: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { key, kind, required: true, gate: false }
}

const fn opt(key: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { key, kind, required: false, gate: false }
}

const fn gate(key: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { key, kind, required: true, gate: true }
}

const USER_JOB: &[ParamSpec] = &[req("user", ParamKind::User), gate("job", ParamKind::Job)];
const USER_RESTART: &[ParamSpec] = &[req("user", ParamKind::User), opt("restart", ParamKind::Flag)];
const USER_DOMAIN: &[ParamSpec] = &[req("user", ParamKind::User), gate("domain", ParamKind::Domain)];
const USER_DOMAIN_RESTART: &[ParamSpec] = &[
    req("user", ParamKind::User),
    gate("domain", ParamKind::Domain),
    opt("restart", ParamKind::Flag),
];
const USER_DATABASE: &[ParamSpec] = &[req("user", ParamKind::User), gate("database", ParamKind::Database)];
const SERVICE: &[ParamSpec] = &[req("srv", ParamKind::Service)];

/// The closed allow-list of privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SuspendCron,
    UnsuspendCron,
    DeleteCron,
    SuspendUser,
    UnsuspendUser,
    SuspendWebDomain,
    UnsuspendWebDomain,
    SuspendDnsDomain,
    SuspendMailDomain,
    SuspendDatabase,
    RestartService,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::SuspendCron,
        Operation::UnsuspendCron,
        Operation::DeleteCron,
        Operation::SuspendUser,
        Operation::UnsuspendUser,
        Operation::SuspendWebDomain,
        Operation::UnsuspendWebDomain,
        Operation::SuspendDnsDomain,
        Operation::SuspendMailDomain,
        Operation::SuspendDatabase,
        Operation::RestartService,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::SuspendCron => "suspend-cron",
            Operation::UnsuspendCron => "unsuspend-cron",
            Operation::DeleteCron => "delete-cron",
            Operation::SuspendUser => "suspend-user",
            Operation::UnsuspendUser => "unsuspend-user",
            Operation::SuspendWebDomain => "suspend-web-domain",
            Operation::UnsuspendWebDomain => "unsuspend-web-domain",
            Operation::SuspendDnsDomain => "suspend-dns-domain",
            Operation::SuspendMailDomain => "suspend-mail-domain",
            Operation::SuspendDatabase => "suspend-database",
            Operation::RestartService => "restart-service",
        }
    }

    /// Script file name under the configured bin directory.
    pub fn script(self) -> &'static str {
        match self {
            Operation::SuspendCron => "v-suspend-cron-job",
            Operation::UnsuspendCron => "v-unsuspend-cron-job",
            Operation::DeleteCron => "v-delete-cron-job",
            Operation::SuspendUser => "v-suspend-user",
            Operation::UnsuspendUser => "v-unsuspend-user",
            Operation::SuspendWebDomain => "v-suspend-web-domain",
            Operation::UnsuspendWebDomain => "v-unsuspend-web-domain",
            Operation::SuspendDnsDomain => "v-suspend-dns-domain",
            Operation::SuspendMailDomain => "v-suspend-mail-domain",
            Operation::SuspendDatabase => "v-suspend-database",
            Operation::RestartService => "v-restart-service",
        }
    }

    /// Positional parameters in the order the script expects them.
    /// Optional parameters only ever trail the required ones.
    pub fn params(self) -> &'static [ParamSpec] {
        match self {
            Operation::SuspendCron | Operation::UnsuspendCron | Operation::DeleteCron => USER_JOB,
            Operation::SuspendUser | Operation::UnsuspendUser => USER_RESTART,
            Operation::SuspendWebDomain | Operation::UnsuspendWebDomain => USER_DOMAIN_RESTART,
            Operation::SuspendDnsDomain | Operation::SuspendMailDomain => USER_DOMAIN,
            Operation::SuspendDatabase => USER_DATABASE,
            Operation::RestartService => SERVICE,
        }
    }

    pub fn category(self) -> Category {
        match self {
            Operation::SuspendCron | Operation::UnsuspendCron | Operation::DeleteCron => Category::Cron,
            Operation::SuspendUser | Operation::UnsuspendUser => Category::User,
            Operation::SuspendWebDomain | Operation::UnsuspendWebDomain => Category::Web,
            Operation::SuspendDnsDomain => Category::Dns,
            Operation::SuspendMailDomain => Category::Mail,
            Operation::SuspendDatabase => Category::Database,
            Operation::RestartService => Category::Service,
        }
    }

    pub fn required_count(self) -> usize {
        self.params().iter().filter(|p| p.required).count()
    }

    pub fn lookup(name: &str) -> Option<Operation> {
        Operation::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Closest catalog names to a mistyped operation, best first.
    pub fn suggest(name: &str) -> Vec<&'static str> {
        let matcher = FzfMatcher::new();
        let items = Operation::ALL.iter().map(|op| (op.name(), op.name().to_string())).collect();
        matcher
            .match_and_sort(name, items)
            .into_iter()
            .take(3)
            .map(|(name, _, _)| name)
            .collect()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = crate::error::DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::lookup(s).ok_or_else(|| crate::error::DispatchError::UnknownOperation {
            name: s.to_string(),
        })
    }
}
