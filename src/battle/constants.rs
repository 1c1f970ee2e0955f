//! Gameplay tuning constants

pub mod tank {
    use std::time::Duration;

    pub const MAX_HEALTH: f32 = 200.0;
    pub const RESPAWN_DELAY: Duration = Duration::from_secs(3);
    /// Default mounted equipment shown in lobbies
    pub const DEFAULT_WEAPON_ID: u64 = 1;
    pub const DEFAULT_HULL_ID: u64 = 1;
}

pub mod score {
    pub const KILL: u32 = 10;
    pub const ASSIST: u32 = 2;
}

pub mod timing {
    use std::time::Duration;

    /// Delay before a mid-match joiner is embodied as a tank
    pub const JOIN_DELAY: Duration = Duration::from_secs(10);
    pub const DOMINATION_DURATION: Duration = Duration::from_secs(45);
    /// Team-score lead that opens the domination window
    pub const DOMINATION_MARGIN: u32 = 30;
}

pub mod flag {
    /// Radius within which a tank can interact with a flag
    pub const TOUCH_RADIUS: f32 = 10.0;
}

pub mod bonus {
    pub const DEFAULT_COOLDOWN_SECS: u64 = 120;
    /// Bonuses with a parachute spawn this far above their region
    pub const PARACHUTE_HEIGHT: f32 = 30.0;
}
