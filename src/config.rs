use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::gestures::GestureLabel;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub max_people: usize,
    /// Max centroid jump (normalized units) for a track to claim a candidate.
    pub reassociation_threshold: f32,
    /// A track is evicted once it has missed more than this many cycles.
    pub max_missing_cycles: u32,
    pub history_capacity: usize,
    pub centroid_min_visibility: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_people: 5,
            reassociation_threshold: 0.25,
            max_missing_cycles: 15,
            history_capacity: 5,
            centroid_min_visibility: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GestureThresholds {
    pub elevate_elbow_deg: f32,
    pub elevate_rise: f32,
    pub elevate_score: u32,
    pub t_stop_elbow_deg: f32,
    pub t_stop_band: f32,
    pub t_stop_score: u32,
    pub wave_elbow_min_deg: f32,
    pub wave_elbow_max_deg: f32,
    pub wave_rise: f32,
    pub wave_score: u32,
    pub rotation_shoulder_span: f32,
    pub rotation_score: u32,
    pub march_knee_deg: f32,
    pub march_score: u32,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            elevate_elbow_deg: 120.0,
            elevate_rise: 0.05,
            elevate_score: 15,
            t_stop_elbow_deg: 160.0,
            t_stop_band: 0.1,
            t_stop_score: 20,
            wave_elbow_min_deg: 60.0,
            wave_elbow_max_deg: 120.0,
            wave_rise: 0.1,
            wave_score: 10,
            rotation_shoulder_span: 0.008,
            rotation_score: 25,
            march_knee_deg: 170.0,
            march_score: 15,
        }
    }
}

/// Single-person menu scheme (arms up → NEXT / PREV / SELECT).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MenuConfig {
    pub cooldown_ms: u64,
    pub shoulder_margin: f32,
    pub min_wrist_visibility: f32,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 800,
            shoulder_margin: 0.05,
            min_wrist_visibility: 0.5,
        }
    }
}

impl MenuConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldMode {
    All,
    Any,
}

/// Multi-person hold-to-confirm (both arms raised for five seconds → exit).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HoldConfig {
    pub required: Vec<GestureLabel>,
    pub mode: HoldMode,
    pub min_score: u32,
    pub recency_ms: u64,
    pub hold_ms: u64,
    pub drop_grace_ms: u64,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            required: vec![GestureLabel::ElevateRight, GestureLabel::ElevateLeft],
            mode: HoldMode::All,
            min_score: 8,
            recency_ms: 500,
            hold_ms: 5000,
            drop_grace_ms: 1000,
        }
    }
}

impl HoldConfig {
    pub fn recency(&self) -> Duration {
        Duration::from_millis(self.recency_ms)
    }
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
    pub fn drop_grace(&self) -> Duration {
        Duration::from_millis(self.drop_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwipeConfig {
    pub threshold: f32,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self { threshold: 0.2 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlotConfig {
    /// Explicit slot reference centers; when empty a grid is used.
    pub centers: Vec<(f32, f32)>,
    pub columns: usize,
    pub rows: usize,
    pub stability_threshold: f32,
    /// Slot the first person ever assigned is pinned to.
    pub pin_first_to: Option<usize>,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            centers: Vec::new(),
            columns: 5,
            rows: 1,
            stability_threshold: 0.3,
            pin_first_to: None,
        }
    }
}

impl SlotConfig {
    pub fn slot_centers(&self) -> Vec<(f32, f32)> {
        if self.centers.is_empty() {
            crate::slots::grid_centers(self.columns, self.rows)
        } else {
            self.centers.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub required_people: usize,
    pub countdown_ms: u64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            required_people: 1,
            countdown_ms: 3000,
        }
    }
}

impl LobbyConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_millis(self.countdown_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub initial_accuracy: f32,
    /// Accuracy gained per gesture score point.
    pub accuracy_per_point: f32,
    pub idle_after_ms: u64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            initial_accuracy: 0.04,
            accuracy_per_point: 0.01,
            idle_after_ms: 5000,
        }
    }
}

impl ScoreConfig {
    pub fn idle_after(&self) -> Duration {
        Duration::from_millis(self.idle_after_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub acquire_attempts: u32,
    pub retry_delay_ms: u64,
    pub idle_sleep_ms: u64,
    pub frame_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: 3,
            retry_delay_ms: 500,
            idle_sleep_ms: 5,
            frame_interval_ms: 33,
            stop_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    pub meta: Meta,
    pub tracking: TrackingConfig,
    pub gestures: GestureThresholds,
    pub menu: MenuConfig,
    pub hold: HoldConfig,
    pub swipe: SwipeConfig,
    pub slots: SlotConfig,
    pub lobby: LobbyConfig,
    pub score: ScoreConfig,
    pub source: SourceConfig,
}

impl Profile {
    pub fn from_toml_str(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("posectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_or_install_in(config_dir()?)
    }

    pub fn load_or_install_in(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::from_toml_str(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
}

fn validate_profile(p: &Profile) -> Result<()> {
    let t = &p.tracking;
    if t.max_people == 0 || t.history_capacity == 0 {
        return Err(anyhow!(
            "tracking.max_people and tracking.history_capacity must be positive"
        ));
    }
    if t.reassociation_threshold <= 0.0 {
        return Err(anyhow!("tracking.reassociation_threshold must be positive"));
    }
    if !(0.0..1.0).contains(&t.centroid_min_visibility) {
        return Err(anyhow!("tracking.centroid_min_visibility must be in [0,1)"));
    }

    let g = &p.gestures;
    if g.wave_elbow_min_deg >= g.wave_elbow_max_deg {
        return Err(anyhow!(
            "gestures.wave_elbow_min_deg must be below gestures.wave_elbow_max_deg"
        ));
    }

    if p.menu.cooldown_ms == 0 {
        return Err(anyhow!("menu.cooldown_ms must be a positive duration"));
    }
    if p.hold.hold_ms == 0 || p.hold.recency_ms == 0 {
        return Err(anyhow!("hold durations must be positive"));
    }
    if p.hold.required.is_empty() {
        return Err(anyhow!("hold.required must name at least one gesture"));
    }
    if !(0.0..=1.0).contains(&p.score.initial_accuracy) || p.score.accuracy_per_point < 0.0 {
        return Err(anyhow!(
            "score.initial_accuracy must be in [0,1] and score.accuracy_per_point non-negative"
        ));
    }
    if p.swipe.threshold <= 0.0 {
        return Err(anyhow!("swipe.threshold must be positive"));
    }

    let slots = p.slots.slot_centers();
    if slots.is_empty() {
        return Err(anyhow!("slots: need at least one slot"));
    }
    if p.slots.stability_threshold <= 0.0 {
        return Err(anyhow!("slots.stability_threshold must be positive"));
    }
    if let Some(pin) = p.slots.pin_first_to {
        if pin >= slots.len() {
            return Err(anyhow!(
                "slots.pin_first_to = {pin} but only {} slots exist",
                slots.len()
            ));
        }
    }

    if p.source.acquire_attempts == 0 {
        return Err(anyhow!("source.acquire_attempts must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_profile_matches_defaults() {
        let p = Profile::from_toml_str(default_profile_text()).unwrap();
        let d = Profile::default();
        assert_eq!(p.tracking.max_people, d.tracking.max_people);
        assert_eq!(p.tracking.max_missing_cycles, 15);
        assert_eq!(p.menu.cooldown(), Duration::from_millis(800));
        assert_eq!(p.hold.hold(), Duration::from_secs(5));
        assert_eq!(p.hold.required, d.hold.required);
        assert_eq!(p.slots.pin_first_to, Some(2));
        assert_eq!(p.slots.slot_centers().len(), 5);
        assert_eq!(p.score.idle_after(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_profile_fills_defaults() {
        let p = Profile::from_toml_str("[tracking]\nmax_people = 2\n").unwrap();
        assert_eq!(p.tracking.max_people, 2);
        assert_eq!(p.tracking.reassociation_threshold, 0.25);
        assert_eq!(p.swipe.threshold, 0.2);
    }

    #[test]
    fn test_hold_labels_parse_upper_case() {
        let p = Profile::from_toml_str(
            "[hold]\nrequired = [\"T_STOP_LEFT\"]\nmode = \"any\"\n",
        )
        .unwrap();
        assert_eq!(p.hold.required, vec![GestureLabel::TStopLeft]);
        assert_eq!(p.hold.mode, HoldMode::Any);
    }

    #[test]
    fn test_rejects_inverted_wave_band() {
        let err = Profile::from_toml_str(
            "[gestures]\nwave_elbow_min_deg = 130.0\nwave_elbow_max_deg = 120.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("wave_elbow_min_deg"));
    }

    #[test]
    fn test_rejects_pin_outside_slots() {
        assert!(Profile::from_toml_str("[slots]\ncolumns = 3\npin_first_to = 3\n").is_err());
    }

    #[test]
    fn test_rejects_accuracy_above_one() {
        let err = Profile::from_toml_str("[score]\ninitial_accuracy = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("score.initial_accuracy"));
    }

    #[test]
    fn test_rejects_zero_people() {
        assert!(Profile::from_toml_str("[tracking]\nmax_people = 0\n").is_err());
    }

    #[test]
    fn test_install_and_switch_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_or_install_in(dir.path().to_path_buf()).unwrap();
        assert_eq!(st.active_name, "default");
        assert!(st.profiles_dir.join("default.toml").exists());

        fs::write(
            st.profiles_dir.join("duo.toml"),
            "[meta]\nname = \"duo\"\n[lobby]\nrequired_people = 2\n",
        )
        .unwrap();
        assert_eq!(st.list_profiles(), vec!["default", "duo"]);

        st.set_active("duo").unwrap();
        assert_eq!(st.profile.lobby.required_people, 2);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "duo");

        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "duo");
    }
}
