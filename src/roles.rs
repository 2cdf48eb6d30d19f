//! Console roles and the sections each one may open.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Staff role assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    SuperAdmin,
    ContentManager,
    CommunityManager,
    Moderator,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::SuperAdmin,
        Role::ContentManager,
        Role::CommunityManager,
        Role::Moderator,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super-admin",
            Self::ContentManager => "content-manager",
            Self::CommunityManager => "community-manager",
            Self::Moderator => "moderator",
        }
    }

    /// Returns the sections visible to this role, in navigation order.
    #[must_use]
    pub fn sections(self) -> Vec<Section> {
        Section::ALL
            .into_iter()
            .filter(|section| section.allows(self))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// A navigable area of the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    Dashboard,
    Events,
    Communities,
    Tracks,
    Feed,
    Marketplace,
    Cms,
    Media,
    Push,
    Users,
    Reports,
    Config,
    Roles,
}

impl Section {
    pub const ALL: [Section; 13] = [
        Section::Dashboard,
        Section::Events,
        Section::Communities,
        Section::Tracks,
        Section::Feed,
        Section::Marketplace,
        Section::Cms,
        Section::Media,
        Section::Push,
        Section::Users,
        Section::Reports,
        Section::Config,
        Section::Roles,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Dashboard => "Dashboard",
            Self::Events => "Events",
            Self::Communities => "Communities",
            Self::Tracks => "Tracks",
            Self::Feed => "Feed Moderation",
            Self::Marketplace => "Marketplace",
            Self::Cms => "Content Manager",
            Self::Media => "Media Library",
            Self::Push => "Push Notifications",
            Self::Users => "Users",
            Self::Reports => "Reports & Analytics",
            Self::Config => "App Configuration",
            Self::Roles => "Roles & Permissions",
        }
    }

    /// Console route of the section.
    #[must_use]
    pub fn route(self) -> &'static str {
        match self {
            Self::Dashboard => "/dashboard",
            Self::Events => "/events",
            Self::Communities => "/communities",
            Self::Tracks => "/tracks",
            Self::Feed => "/feed",
            Self::Marketplace => "/marketplace",
            Self::Cms => "/cms",
            Self::Media => "/media",
            Self::Push => "/push",
            Self::Users => "/users",
            Self::Reports => "/reports",
            Self::Config => "/config",
            Self::Roles => "/roles",
        }
    }

    /// Returns true if `role` may open this section.
    #[must_use]
    pub fn allows(self, role: Role) -> bool {
        use Role::{CommunityManager as Com, ContentManager as Con, Moderator as Mod, SuperAdmin as Sa};

        let roles: &[Role] = match self {
            Self::Dashboard | Self::Reports => &[Sa, Con, Com, Mod],
            Self::Events | Self::Communities => &[Sa, Con, Com],
            Self::Tracks => &[Sa, Com],
            Self::Feed | Self::Marketplace => &[Sa, Con, Mod],
            Self::Cms | Self::Media | Self::Push => &[Sa, Con],
            Self::Users => &[Sa, Mod],
            Self::Config | Self::Roles => &[Sa],
        };
        roles.contains(&role)
    }
}
