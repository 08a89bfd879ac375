use std::fmt;

use serde::{Deserialize, Serialize};

/// 优先级层级，1 为最高（critical），5 为最低（background）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const CRITICAL: Tier = Tier(1);
    pub const BACKGROUND: Tier = Tier(5);

    /// 构造层级，超出范围返回 None
    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&level).then_some(Self(level))
    }

    /// 将任意输入钳制到 [1,5]，第二个返回值表示是否发生了钳制
    pub fn clamp_from(level: i64) -> (Self, bool) {
        let clamped = level.clamp(Self::MIN as i64, Self::MAX as i64);
        (Self(clamped as u8), clamped != level)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// 数组下标（0..5）
    pub fn index(self) -> usize {
        (self.0 - Self::MIN) as usize
    }

    /// 按优先级从高到低遍历所有层级
    pub fn all() -> impl Iterator<Item = Tier> {
        (Self::MIN..=Self::MAX).map(Tier)
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tier::new(value).ok_or_else(|| format!("层级必须在1-5之间: {value}"))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier-{}", self.0)
    }
}

/// 队列层级的静态配置，运行期间不会修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTier {
    pub name: String,
    pub level: Tier,
    pub sla_hours: u32,
}

impl QueueTier {
    pub fn new(name: impl Into<String>, level: Tier, sla_hours: u32) -> Self {
        Self {
            name: name.into(),
            level,
            sla_hours,
        }
    }

    /// 默认的五个层级
    pub fn defaults() -> Vec<QueueTier> {
        [
            ("critical", 1),
            ("high", 4),
            ("normal", 24),
            ("low", 72),
            ("background", 168),
        ]
        .into_iter()
        .zip(Tier::all())
        .map(|((name, sla), tier)| QueueTier::new(name, tier, sla))
        .collect()
    }

    pub fn sla_seconds(&self) -> i64 {
        self.sla_hours as i64 * 3600
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_from() {
        assert_eq!(Tier::clamp_from(3), (Tier(3), false));
        assert_eq!(Tier::clamp_from(0), (Tier(1), true));
        assert_eq!(Tier::clamp_from(-7), (Tier(1), true));
        assert_eq!(Tier::clamp_from(9), (Tier(5), true));
    }

    #[test]
    fn test_tier_order_and_index() {
        let tiers: Vec<_> = Tier::all().collect();
        assert_eq!(tiers.len(), 5);
        assert!(tiers[0] < tiers[4]);
        assert_eq!(Tier::BACKGROUND.index(), 4);
    }

    #[test]
    fn test_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Tier>("6").is_err());
        assert_eq!(serde_json::from_str::<Tier>("2").unwrap().level(), 2);
    }

    #[test]
    fn test_default_tiers() {
        let tiers = QueueTier::defaults();
        assert_eq!(tiers.len(), 5);
        assert_eq!(tiers[0].name, "critical");
        assert_eq!(tiers[4].level, Tier::BACKGROUND);
        assert_eq!(tiers[0].sla_seconds(), 3600);
    }
}
