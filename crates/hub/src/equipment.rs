//! Equipment register and maintenance log, served under
//! `/equipment/enhanced`.

use serde::{Deserialize, Serialize};
use time::Date;
use tracing::info;
use uuid::Uuid;

use crate::error::{FarmError, FarmResult};
use crate::store::{Record, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    Tractor,
    Harvester,
    Sprayer,
    Planter,
    Irrigation,
    Vehicle,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentStatus {
    Operational,
    Maintenance,
    Repair,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: String,
    pub date: Date,
    pub description: String,
    pub cost: f64,
    pub engine_hours: Option<f64>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    pub equipment_type: EquipmentType,
    pub make: String,
    pub model: String,
    pub year: Option<u16>,
    pub serial_number: Option<String>,
    pub status: EquipmentStatus,
    pub engine_hours: f64,
    /// Hours between services; `None` means not tracked.
    pub service_interval_hours: Option<f64>,
    pub last_service_hours: f64,
    pub purchase_date: Option<Date>,
    pub purchase_price: Option<f64>,
    pub maintenance_log: Vec<MaintenanceRecord>,
}

impl Record for Equipment {
    const KIND: &'static str = "equipment";
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEquipment {
    pub id: Option<String>,
    pub name: String,
    pub equipment_type: EquipmentType,
    pub make: String,
    pub model: String,
    pub year: Option<u16>,
    pub serial_number: Option<String>,
    #[serde(default)]
    pub engine_hours: f64,
    pub service_interval_hours: Option<f64>,
    pub purchase_date: Option<Date>,
    pub purchase_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EquipmentUpdate {
    pub name: Option<String>,
    pub status: Option<EquipmentStatus>,
    pub engine_hours: Option<f64>,
    pub service_interval_hours: Option<f64>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMaintenance {
    pub date: Date,
    pub description: String,
    #[serde(default)]
    pub cost: f64,
    pub engine_hours: Option<f64>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceDue {
    pub equipment_id: String,
    pub name: String,
    pub hours_since_service: f64,
    pub service_interval_hours: f64,
    pub overdue_by: f64,
}

#[derive(Debug, Default)]
pub struct EquipmentService {
    items: Store<Equipment>,
}

impl EquipmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_equipment(&self, new: NewEquipment) -> FarmResult<Equipment> {
        if new.name.trim().is_empty() {
            return Err(FarmError::validation("equipment name is empty"));
        }
        if new.engine_hours < 0.0 {
            return Err(FarmError::validation("engine_hours is negative"));
        }
        if matches!(new.service_interval_hours, Some(h) if h <= 0.0) {
            return Err(FarmError::validation("service_interval_hours must be positive"));
        }
        let eq = self.items.insert(Equipment {
            id: new.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            name: new.name,
            equipment_type: new.equipment_type,
            make: new.make,
            model: new.model,
            year: new.year,
            serial_number: new.serial_number,
            status: EquipmentStatus::Operational,
            engine_hours: new.engine_hours,
            service_interval_hours: new.service_interval_hours,
            last_service_hours: new.engine_hours,
            purchase_date: new.purchase_date,
            purchase_price: new.purchase_price,
            maintenance_log: Vec::new(),
        })?;
        info!(equipment = %eq.id, name = %eq.name, "equipment registered");
        Ok(eq)
    }

    pub fn get_equipment(&self, id: &str) -> Option<Equipment> {
        self.items.get(id)
    }

    pub fn all_equipment(&self) -> Vec<Equipment> {
        self.items.list()
    }

    pub fn update_equipment(&self, id: &str, update: EquipmentUpdate) -> FarmResult<Equipment> {
        self.items.update(id, |e| {
            if let Some(name) = update.name {
                e.name = name;
            }
            if let Some(status) = update.status {
                e.status = status;
            }
            if let Some(hours) = update.engine_hours {
                // hour meters only go forward
                if hours < e.engine_hours {
                    return Err(FarmError::validation(format!(
                        "engine_hours cannot go backwards ({} -> {hours})",
                        e.engine_hours
                    )));
                }
                e.engine_hours = hours;
            }
            if let Some(interval) = update.service_interval_hours {
                if interval <= 0.0 {
                    return Err(FarmError::validation("service_interval_hours must be positive"));
                }
                e.service_interval_hours = Some(interval);
            }
            if update.serial_number.is_some() {
                e.serial_number = update.serial_number;
            }
            Ok(e.clone())
        })
    }

    pub fn delete_equipment(&self, id: &str) -> FarmResult<Equipment> {
        self.items.remove(id)
    }

    /// Append to the maintenance log. A record carrying an hour-meter reading
    /// resets the service counter and puts equipment in the shop back to
    /// operational.
    pub fn log_maintenance(&self, id: &str, new: NewMaintenance) -> FarmResult<Equipment> {
        if new.cost < 0.0 {
            return Err(FarmError::validation("maintenance cost is negative"));
        }
        let eq = self.items.update(id, |e| {
            if e.status == EquipmentStatus::Retired {
                return Err(FarmError::invalid_state(format!("equipment {id} is retired")));
            }
            if let Some(hours) = new.engine_hours {
                e.engine_hours = e.engine_hours.max(hours);
                e.last_service_hours = hours;
                if matches!(e.status, EquipmentStatus::Maintenance | EquipmentStatus::Repair) {
                    e.status = EquipmentStatus::Operational;
                }
            }
            e.maintenance_log.push(MaintenanceRecord {
                id: Uuid::now_v7().to_string(),
                date: new.date,
                description: new.description,
                cost: new.cost,
                engine_hours: new.engine_hours,
                performed_by: new.performed_by,
            });
            Ok(e.clone())
        })?;
        info!(equipment = %id, entries = eq.maintenance_log.len(), "maintenance logged");
        Ok(eq)
    }

    /// Equipment at or past its service interval, most overdue first.
    pub fn maintenance_due(&self) -> Vec<MaintenanceDue> {
        let mut due: Vec<MaintenanceDue> = self
            .items
            .filter(|e| e.status != EquipmentStatus::Retired)
            .into_iter()
            .filter_map(|e| {
                let interval = e.service_interval_hours?;
                let since = e.engine_hours - e.last_service_hours;
                (since >= interval).then(|| MaintenanceDue {
                    equipment_id: e.id.clone(),
                    name: e.name.clone(),
                    hours_since_service: since,
                    service_interval_hours: interval,
                    overdue_by: since - interval,
                })
            })
            .collect();
        due.sort_by(|a, b| b.overdue_by.total_cmp(&a.overdue_by));
        due
    }
}
