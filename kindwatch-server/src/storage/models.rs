use crate::storage::schema::{app_usage, devices, locations, sessions, settings, web_history, zones};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = devices)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub is_paired: bool,
    pub last_seen_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub is_paired: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = app_usage)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct AppUsage {
    pub id: i32,
    pub device_id: String,
    pub package_name: String,
    pub app_name: String,
    pub used_today_minutes: i32,
    pub is_blocked: bool,
    pub daily_limit_minutes: i32,
    pub last_reported_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = app_usage)]
pub struct NewAppUsage<'a> {
    pub device_id: &'a str,
    pub package_name: &'a str,
    pub app_name: &'a str,
    pub used_today_minutes: i32,
    pub is_blocked: bool,
    pub daily_limit_minutes: i32,
    pub last_reported_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = locations)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct Location {
    pub id: i32,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = locations)]
pub struct NewLocation<'a> {
    pub device_id: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = web_history)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct WebHistoryRow {
    pub id: i32,
    pub device_id: String,
    pub url: String,
    pub title: Option<String>,
    pub visited_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = web_history)]
pub struct NewWebHistoryRow<'a> {
    pub device_id: &'a str,
    pub url: &'a str,
    pub title: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = zones)]
pub struct Zone {
    pub id: i32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

#[derive(Insertable)]
#[diesel(table_name = zones)]
pub struct NewZone<'a> {
    pub name: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = settings)]
pub struct SettingsRow {
    pub id: i32,
    pub bedtime_weeknight: String,
    pub bedtime_weekend: String,
    pub uninstall_protection: bool,
    pub location_tracking: bool,
    pub revision: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub username: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
}
