//! Address bans with wall-clock expiry.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub addr: IpAddr,
    /// `None` bans for good.
    pub expires: Option<DateTime<Utc>>,
    pub reason: String,
}

impl Ban {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(true, |t| t > now)
    }

    /// Whole minutes left, rounded up.
    pub fn minutes_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires
            .map(|t| ((t - now).num_seconds().max(0) + 59) / 60)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BanList {
    bans: Vec<Ban>,
}

impl BanList {
    /// Bans `addr` for `minutes` (0 for good), replacing an existing ban.
    pub fn ban_at(&mut self, addr: IpAddr, minutes: u32, reason: &str, now: DateTime<Utc>) -> &Ban {
        let expires = (minutes > 0).then(|| now + Duration::minutes(minutes as i64));
        self.bans.retain(|b| b.addr != addr);
        self.bans.push(Ban {
            addr,
            expires,
            reason: reason.to_string(),
        });
        &self.bans[self.bans.len() - 1]
    }

    pub fn ban(&mut self, addr: IpAddr, minutes: u32, reason: &str) -> &Ban {
        self.ban_at(addr, minutes, reason, Utc::now())
    }

    pub fn unban(&mut self, addr: IpAddr) -> bool {
        let before = self.bans.len();
        self.bans.retain(|b| b.addr != addr);
        self.bans.len() != before
    }

    pub fn find_at(&self, addr: IpAddr, now: DateTime<Utc>) -> Option<&Ban> {
        self.bans
            .iter()
            .find(|b| b.addr == addr && b.is_active(now))
    }

    pub fn find(&self, addr: IpAddr) -> Option<&Ban> {
        self.find_at(addr, Utc::now())
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.find(addr).is_some()
    }

    /// Forgets expired bans.
    pub fn purge_at(&mut self, now: DateTime<Utc>) {
        self.bans.retain(|b| b.is_active(now));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ban> {
        self.bans.iter()
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
