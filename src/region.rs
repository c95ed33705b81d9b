//! Region data model and the immutable, startup-loaded region registry.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    City,
    State,
    Country,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub country: String,
    pub region_type: RegionType,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_group: Option<String>,
}

impl Region {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        country: impl Into<String>,
        region_type: RegionType,
        lat: f64,
        lon: f64,
    ) -> Result<Self, AppError> {
        let region = Self {
            id: id.into(),
            name: name.into(),
            country: country.into(),
            region_type,
            lat,
            lon,
            region_group: None,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.region_group = Some(group.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_region_id(&self.id)?;
        validate_lat_lon(self.lat, self.lon)
    }
}

/// The sole identity key for a region. `"None"` and the empty string are
/// both rejected at ingress, per the spec's data model invariant.
pub fn validate_region_id(region_id: &str) -> Result<(), AppError> {
    if region_id.is_empty() || region_id == "None" {
        return Err(AppError::invalid_input(
            "region_id must be non-empty and not the literal string \"None\"",
        ));
    }
    Ok(())
}

pub fn validate_lat_lon(lat: f64, lon: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::invalid_input(format!(
            "latitude {lat} out of range [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(AppError::invalid_input(format!(
            "longitude {lon} out of range [-180, 180]"
        )));
    }
    Ok(())
}

/// Immutable catalog of regions, loaded once at startup and shared by
/// reference thereafter — no synchronization required.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<Region>,
}

impl RegionRegistry {
    pub fn new(regions: Vec<Region>) -> Result<Self, AppError> {
        for region in &regions {
            region.validate()?;
        }
        Ok(Self { regions })
    }

    /// The registry shipped with the binary: a handful of representative
    /// regions spanning city/state/country granularity, enough to exercise
    /// the regional-variance invariant out of the box.
    pub fn default_catalog() -> Self {
        let regions = vec![
            Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0)
                .expect("static region is valid"),
            Region::new("us_az", "Arizona", "US", RegionType::State, 34.0, -112.0)
                .expect("static region is valid"),
            Region::new("us_ny_nyc", "New York City", "US", RegionType::City, 40.7128, -74.0060)
                .expect("static region is valid"),
            Region::new("us_tx_hou", "Houston", "US", RegionType::City, 29.7604, -95.3698)
                .expect("static region is valid"),
            Region::new("us", "United States", "US", RegionType::Country, 39.8283, -98.5795)
                .expect("static region is valid"),
        ];
        Self { regions }
    }

    pub fn get(&self, region_id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    pub fn list(&self) -> &[Region] {
        &self.regions
    }

    /// Resolve a region by id, falling back to an ad-hoc region built from
    /// the caller-supplied fields for requests against regions outside the
    /// static catalog (the HTTP API always supplies name/lat/lon so the
    /// registry need not be exhaustive).
    pub fn resolve(
        &self,
        region_id: &str,
        region_name: Option<&str>,
        lat: f64,
        lon: f64,
    ) -> Result<Region, AppError> {
        validate_region_id(region_id)?;
        if let Some(region) = self.get(region_id) {
            return Ok(region.clone());
        }
        validate_lat_lon(lat, lon)?;
        Region::new(
            region_id,
            region_name.unwrap_or(region_id),
            "unknown",
            RegionType::Custom,
            lat,
            lon,
        )
    }
}
