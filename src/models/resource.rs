/*!
 * Resource Models
 *
 * Physical resources (rooms, treatment beds, equipment) grouped by
 * resource type. Services declare per-type quantities; confirmed
 * appointments hold allocations on specific instances.
 */

use sqlx::FromRow;

/// Resource type row (e.g. "治療床")
#[derive(Debug, Clone, FromRow)]
pub struct ResourceType {
    pub id: i64,
    pub clinic_id: i64,
    pub name: String,
}

/// Resource instance row
#[derive(Debug, Clone, FromRow)]
pub struct Resource {
    pub id: i64,
    pub clinic_id: i64,
    pub resource_type_id: i64,
    pub name: String,
    pub is_active: bool,
}
