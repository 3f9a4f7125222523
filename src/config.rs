use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::grading::GradeScale;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub const GLOBAL_KEY: &str = "grading.config";

/// How per-assessment percentages roll up into a subject score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectAveraging {
    /// Arithmetic mean of per-assessment percentages.
    #[default]
    Unweighted,
    /// Sum of marks over sum of max marks.
    MaxMarksWeighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GradingConfig {
    pub scale: GradeScale,
    /// Percentage at or above which a result counts as a pass.
    pub pass_threshold: f64,
    pub top_performers: usize,
    pub subject_averaging: SubjectAveraging,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            scale: GradeScale::standard(),
            pass_threshold: 50.0,
            top_performers: 5,
            subject_averaging: SubjectAveraging::Unweighted,
        }
    }
}

impl GradingConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.pass_threshold.is_finite() || !(0.0..=100.0).contains(&self.pass_threshold) {
            return Err(EngineError::configuration(format!(
                "passThreshold must be within 0..100, found {}",
                self.pass_threshold
            )));
        }
        if self.top_performers == 0 {
            return Err(EngineError::configuration(
                "topPerformers must be at least 1",
            ));
        }
        Ok(())
    }
}

pub fn settings_key(school_id: Option<&str>) -> String {
    match school_id {
        Some(s) => format!("{}.{}", GLOBAL_KEY, s),
        None => GLOBAL_KEY.to_string(),
    }
}

fn parse_stored(key: &str, raw: Value) -> EngineResult<GradingConfig> {
    let cfg: GradingConfig = serde_json::from_value(raw).map_err(|e| {
        EngineError::configuration(format!("stored setting '{}' is invalid: {}", key, e))
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// School override, then global, then the built-in defaults.
/// A stored value that does not validate is an error, never a fallback.
pub fn load(conn: &Connection, school_id: Option<&str>) -> EngineResult<GradingConfig> {
    let mut keys = Vec::with_capacity(2);
    if school_id.is_some() {
        keys.push(settings_key(school_id));
    }
    keys.push(settings_key(None));

    for key in keys {
        if let Some(raw) = db::settings_get_json(conn, &key)? {
            return parse_stored(&key, raw);
        }
    }
    Ok(GradingConfig::default())
}

pub fn load_for_class(conn: &Connection, class_id: &str) -> EngineResult<GradingConfig> {
    let school_id: Option<Option<String>> = conn
        .query_row(
            "SELECT school_id FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(school_id) = school_id else {
        return Err(EngineError::not_found("class", class_id));
    };
    load(conn, school_id.as_deref())
}

/// Overlay `patch` on the currently effective config and validate the result.
pub fn merge_patch(current: &GradingConfig, patch: &Value) -> EngineResult<GradingConfig> {
    let Some(patch_obj) = patch.as_object() else {
        return Err(EngineError::validation("patch must be an object"));
    };
    let mut merged = serde_json::to_value(current)
        .map_err(|e| EngineError::configuration(e.to_string()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    let cfg: GradingConfig = serde_json::from_value(merged)
        .map_err(|e| EngineError::configuration(format!("invalid grading config: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn save(conn: &Connection, school_id: Option<&str>, cfg: &GradingConfig) -> EngineResult<()> {
    cfg.validate()?;
    let value =
        serde_json::to_value(cfg).map_err(|e| EngineError::configuration(e.to_string()))?;
    let key = settings_key(school_id);
    db::settings_set_json(conn, &key, &value)?;
    info!(key = %key, bands = cfg.scale.bands().len(), "grading config saved");
    Ok(())
}
