//! Crop lifecycle.
//!
//! ```text
//! planned ──plant──▶ planted ──advance──▶ growing ──harvest──▶ harvested
//!                        └───────────┴──────fail──────────────▶ failed
//! ```
//!
//! Within planted/growing, the current growth stage walks the per-crop-type
//! table in [`default_growth_stages`]. Advancing past the last stage is a
//! no-op that reports `false`.

use serde::{Deserialize, Serialize};
use time::Date;
use tracing::info;
use uuid::Uuid;

use crate::error::{FarmError, FarmResult};
use crate::store::{Record, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    Corn,
    Soybean,
    Wheat,
    Tomato,
    Lettuce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropStatus {
    Planned,
    Planted,
    Growing,
    Harvested,
    Failed,
}

impl CropStatus {
    fn in_field(self) -> bool {
        matches!(self, Self::Planted | Self::Growing)
    }
}

// ---------------------------------------------------------------------------
// Stage tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTemplate {
    pub name: &'static str,
    pub days: u32,
    pub checklist: &'static [&'static str],
}

const fn stage(name: &'static str, days: u32, checklist: &'static [&'static str]) -> StageTemplate {
    StageTemplate {
        name,
        days,
        checklist,
    }
}

const CORN_STAGES: &[StageTemplate] = &[
    stage("Germination", 10, &["Check soil temperature", "Confirm emergence"]),
    stage("Vegetative", 45, &["Side-dress nitrogen", "Scout for rootworm"]),
    stage("Tasseling", 15, &["Maintain soil moisture", "Scout for earworm"]),
    stage("Grain Fill", 35, &["Monitor kernel dent"]),
    stage("Maturity", 15, &["Check grain moisture", "Schedule harvest"]),
];

const SOYBEAN_STAGES: &[StageTemplate] = &[
    stage("Emergence", 10, &["Stand count"]),
    stage("Vegetative", 35, &["Weed control", "Scout for aphids"]),
    stage("Flowering", 20, &["Fungicide decision"]),
    stage("Pod Fill", 30, &["Maintain soil moisture"]),
    stage("Maturity", 15, &["Check pod moisture", "Schedule harvest"]),
];

const WHEAT_STAGES: &[StageTemplate] = &[
    stage("Germination", 10, &["Confirm emergence"]),
    stage("Tillering", 40, &["Nitrogen top-dress"]),
    stage("Heading", 20, &["Scout for rust"]),
    stage("Ripening", 30, &["Check kernel hardness", "Schedule harvest"]),
];

const TOMATO_STAGES: &[StageTemplate] = &[
    stage("Transplant", 7, &["Harden off seedlings", "Water in transplants"]),
    stage("Vegetative", 25, &["Stake or cage", "Prune suckers"]),
    stage("Flowering", 20, &["Check pollination", "Calcium spray"]),
    stage("Fruiting", 30, &["Scout for hornworm", "Even watering"]),
    stage("Harvest", 30, &["Pick at breaker stage"]),
];

const LETTUCE_STAGES: &[StageTemplate] = &[
    stage("Germination", 7, &["Keep seedbed moist"]),
    stage("Leaf Development", 25, &["Thin seedlings", "Scout for aphids"]),
    stage("Head Formation", 20, &["Check for tipburn", "Schedule harvest"]),
];

pub fn default_growth_stages(crop_type: CropType) -> &'static [StageTemplate] {
    match crop_type {
        CropType::Corn => CORN_STAGES,
        CropType::Soybean => SOYBEAN_STAGES,
        CropType::Wheat => WHEAT_STAGES,
        CropType::Tomato => TOMATO_STAGES,
        CropType::Lettuce => LETTUCE_STAGES,
    }
}

/// Base yield per acre and its unit.
pub fn base_yield_per_acre(crop_type: CropType) -> (f64, &'static str) {
    match crop_type {
        CropType::Corn => (175.0, "bu"),
        CropType::Soybean => (50.0, "bu"),
        CropType::Wheat => (60.0, "bu"),
        CropType::Tomato => (30_000.0, "lb"),
        CropType::Lettuce => (25_000.0, "lb"),
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthStage {
    pub index: usize,
    pub name: String,
    pub started: Date,
    pub expected_days: u32,
    pub ended: Option<Date>,
    pub checklist: Vec<String>,
}

impl GrowthStage {
    fn open(index: usize, t: &StageTemplate, started: Date) -> Self {
        Self {
            index,
            name: t.name.to_string(),
            started,
            expected_days: t.days,
            ended: None,
            checklist: t.checklist.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn expected_end(&self) -> Date {
        self.started
            .saturating_add(time::Duration::days(i64::from(self.expected_days)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentType {
    Pesticide,
    Herbicide,
    Fungicide,
    Fertilizer,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: String,
    pub treatment_type: TreatmentType,
    pub product: String,
    /// application rate per acre, in the product's own unit
    pub rate: f64,
    pub date: Date,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub date: Date,
    pub quantity: f64,
    pub unit: String,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub id: String,
    pub name: String,
    pub crop_type: CropType,
    pub variety: Option<String>,
    pub zone_id: Option<String>,
    pub area_acres: f64,
    pub status: CropStatus,
    pub planted_date: Option<Date>,
    pub expected_harvest: Option<Date>,
    pub current_stage: Option<GrowthStage>,
    pub growth_history: Vec<GrowthStage>,
    pub treatments: Vec<Treatment>,
    pub harvest: Option<HarvestRecord>,
    pub failure_reason: Option<String>,
}

impl Record for Crop {
    const KIND: &'static str = "crop";
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCrop {
    pub id: Option<String>,
    pub name: String,
    pub crop_type: CropType,
    pub variety: Option<String>,
    pub zone_id: Option<String>,
    pub area_acres: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CropUpdate {
    pub name: Option<String>,
    pub variety: Option<String>,
    pub zone_id: Option<String>,
    pub area_acres: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTreatment {
    pub treatment_type: TreatmentType,
    pub product: String,
    pub rate: f64,
    pub date: Date,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldEstimate {
    pub crop_id: String,
    pub per_acre: f64,
    pub total: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverdueStage {
    pub crop_id: String,
    pub crop_name: String,
    pub stage: String,
    pub expected_end: Date,
    pub days_overdue: i64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CropService {
    crops: Store<Crop>,
}

fn require_in_field(crop: &Crop, action: &str) -> FarmResult<()> {
    if crop.status.in_field() {
        Ok(())
    } else {
        Err(FarmError::invalid_state(format!(
            "cannot {action} crop {} in status {:?}",
            crop.id, crop.status
        )))
    }
}

impl CropService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_crop(&self, new: NewCrop) -> FarmResult<Crop> {
        if new.name.trim().is_empty() {
            return Err(FarmError::validation("crop name is empty"));
        }
        if new.area_acres <= 0.0 {
            return Err(FarmError::validation("area_acres must be positive"));
        }
        let crop = self.crops.insert(Crop {
            id: new.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            name: new.name,
            crop_type: new.crop_type,
            variety: new.variety,
            zone_id: new.zone_id,
            area_acres: new.area_acres,
            status: CropStatus::Planned,
            planted_date: None,
            expected_harvest: None,
            current_stage: None,
            growth_history: Vec::new(),
            treatments: Vec::new(),
            harvest: None,
            failure_reason: None,
        })?;
        info!(crop = %crop.id, kind = ?crop.crop_type, "crop created");
        Ok(crop)
    }

    pub fn get_crop(&self, id: &str) -> Option<Crop> {
        self.crops.get(id)
    }

    pub fn all_crops(&self) -> Vec<Crop> {
        self.crops.list()
    }

    pub fn crops_in_zone(&self, zone_id: &str) -> Vec<Crop> {
        self.crops.filter(|c| c.zone_id.as_deref() == Some(zone_id))
    }

    pub fn update_crop(&self, id: &str, update: CropUpdate) -> FarmResult<Crop> {
        self.crops.update(id, |c| {
            if let Some(name) = update.name {
                c.name = name;
            }
            if update.variety.is_some() {
                c.variety = update.variety;
            }
            if update.zone_id.is_some() {
                c.zone_id = update.zone_id;
            }
            if let Some(area) = update.area_acres {
                if area <= 0.0 {
                    return Err(FarmError::validation("area_acres must be positive"));
                }
                c.area_acres = area;
            }
            Ok(c.clone())
        })
    }

    pub fn delete_crop(&self, id: &str) -> FarmResult<Crop> {
        self.crops.remove(id)
    }

    /// Put the crop in the ground and open its first growth stage.
    pub fn plant_crop(&self, id: &str, date: Date) -> FarmResult<Crop> {
        let crop = self.crops.update(id, |c| {
            if c.status != CropStatus::Planned {
                return Err(FarmError::invalid_state(format!(
                    "crop {id} is already {:?}",
                    c.status
                )));
            }
            let stages = default_growth_stages(c.crop_type);
            let season_days: u32 = stages.iter().map(|s| s.days).sum();
            c.status = CropStatus::Planted;
            c.planted_date = Some(date);
            let season = time::Duration::days(i64::from(season_days));
            c.expected_harvest = Some(date.saturating_add(season));
            c.current_stage = stages.first().map(|t| GrowthStage::open(0, t, date));
            Ok(c.clone())
        })?;
        info!(crop = %id, %date, "crop planted");
        Ok(crop)
    }

    /// Close the current stage and open the next. `Ok(false)` when the crop
    /// is already in its last stage.
    pub fn advance_growth_stage(&self, id: &str, date: Date) -> FarmResult<bool> {
        self.crops.update(id, |c| {
            require_in_field(c, "advance")?;
            let stages = default_growth_stages(c.crop_type);
            let next = c.current_stage.as_ref().map_or(0, |s| s.index + 1);
            let Some(template) = stages.get(next) else {
                return Ok(false);
            };

            if let Some(mut done) = c.current_stage.take() {
                done.ended = Some(date);
                c.growth_history.push(done);
            }
            c.current_stage = Some(GrowthStage::open(next, template, date));
            c.status = CropStatus::Growing;
            info!(crop = %id, stage = template.name, "growth stage advanced");
            Ok(true)
        })
    }

    pub fn add_treatment(&self, id: &str, new: NewTreatment) -> FarmResult<Treatment> {
        if new.rate < 0.0 {
            return Err(FarmError::validation("treatment rate is negative"));
        }
        self.crops.update(id, |c| {
            if matches!(c.status, CropStatus::Harvested | CropStatus::Failed) {
                return Err(FarmError::invalid_state(format!(
                    "crop {id} is {:?}",
                    c.status
                )));
            }
            let t = Treatment {
                id: Uuid::now_v7().to_string(),
                treatment_type: new.treatment_type,
                product: new.product,
                rate: new.rate,
                date: new.date,
                notes: new.notes,
            };
            c.treatments.push(t.clone());
            Ok(t)
        })
    }

    pub fn record_harvest(&self, id: &str, harvest: HarvestRecord) -> FarmResult<Crop> {
        if harvest.quantity < 0.0 {
            return Err(FarmError::validation("harvest quantity is negative"));
        }
        let crop = self.crops.update(id, |c| {
            require_in_field(c, "harvest")?;
            if let Some(mut last) = c.current_stage.take() {
                last.ended = Some(harvest.date);
                c.growth_history.push(last);
            }
            c.status = CropStatus::Harvested;
            c.harvest = Some(harvest);
            Ok(c.clone())
        })?;
        info!(crop = %id, "crop harvested");
        Ok(crop)
    }

    pub fn mark_failed(&self, id: &str, reason: impl Into<String>, date: Date) -> FarmResult<Crop> {
        let reason = reason.into();
        self.crops.update(id, |c| {
            if matches!(c.status, CropStatus::Harvested | CropStatus::Failed) {
                return Err(FarmError::invalid_state(format!(
                    "crop {id} is already {:?}",
                    c.status
                )));
            }
            if let Some(mut last) = c.current_stage.take() {
                last.ended = Some(date);
                c.growth_history.push(last);
            }
            c.status = CropStatus::Failed;
            c.failure_reason = Some(reason);
            Ok(c.clone())
        })
    }

    pub fn estimate_yield(&self, id: &str) -> FarmResult<YieldEstimate> {
        let crop = self
            .crops
            .get(id)
            .ok_or_else(|| FarmError::not_found("crop", id))?;
        let (per_acre, unit) = base_yield_per_acre(crop.crop_type);
        Ok(YieldEstimate {
            crop_id: crop.id,
            per_acre,
            total: per_acre * crop.area_acres,
            unit: unit.to_string(),
        })
    }

    /// Crops whose current stage should have ended before `today`.
    pub fn overdue_stages(&self, today: Date) -> Vec<OverdueStage> {
        self.crops
            .filter(|c| c.status.in_field())
            .into_iter()
            .filter_map(|c| {
                let stage = c.current_stage.as_ref()?;
                let expected_end = stage.expected_end();
                (today > expected_end).then(|| OverdueStage {
                    crop_id: c.id.clone(),
                    crop_name: c.name.clone(),
                    stage: stage.name.clone(),
                    expected_end,
                    days_overdue: (today - expected_end).whole_days(),
                })
            })
            .collect()
    }
}
