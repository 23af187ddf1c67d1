use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;
use crate::{
    config::TreatmentPolicy,
    loader::Dataset,
    models::{ChronoKey, Treatment, User, UserId, WeighIn},
    processor::{DataQualityReport, DataWarning},
    TREATMENTS_TABLE, USERS_TABLE, WEIGH_INS_TABLE,
};

/// One weigh-in joined with its user and the treatment it is attributed to.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub user: Arc<User>,
    pub treatment: Treatment,
    pub weigh_in: WeighIn,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum WeighInKey {
    Id(u64),
    Content(UserId, NaiveDate, OrderedFloat<f64>),
}

impl WeighInKey {
    fn of(weigh_in: &WeighIn) -> Self {
        match weigh_in.weigh_in_id {
            Some(id) => WeighInKey::Id(id),
            None => WeighInKey::Content(weigh_in.user_id, weigh_in.date, OrderedFloat(weigh_in.weight)),
        }
    }
}

fn weigh_in_order(weigh_in: &WeighIn) -> (UserId, ChronoKey) {
    (weigh_in.user_id, weigh_in.chrono_key())
}

/// Collapses users sharing a `user_id`. Conflicting rows keep the smallest
/// record so the survivor never depends on input order.
pub fn dedup_users(users: &[User], report: &mut DataQualityReport) -> BTreeMap<UserId, Arc<User>> {
    let mut unique: BTreeMap<UserId, User> = BTreeMap::new();
    for user in users {
        match unique.get_mut(&user.user_id) {
            Some(existing) => {
                report.record(DataWarning::DuplicateRecord {
                    table: USERS_TABLE,
                    key: format!("user_id={}", user.user_id),
                });
                if *user < *existing {
                    *existing = user.clone();
                }
            }
            None => {
                unique.insert(user.user_id, user.clone());
            }
        }
    }
    unique.into_iter().map(|(id, user)| (id, Arc::new(user))).collect()
}

/// Exact-duplicate treatments collapse; the rest are grouped per user in
/// ascending start-date order. Treatments of unknown users are dropped.
pub fn group_treatments(
    treatments: &[Treatment],
    users: &BTreeMap<UserId, Arc<User>>,
    report: &mut DataQualityReport,
) -> BTreeMap<UserId, Vec<Treatment>> {
    let mut unique = BTreeSet::new();
    for treatment in treatments {
        if !unique.insert(treatment.clone()) {
            report.record(DataWarning::DuplicateRecord {
                table: TREATMENTS_TABLE,
                key: format!(
                    "user_id={} treatment_id={} start_date={}",
                    treatment.user_id, treatment.treatment_id, treatment.start_date
                ),
            });
        }
    }

    let mut grouped: BTreeMap<UserId, Vec<Treatment>> = BTreeMap::new();
    for treatment in unique {
        if !users.contains_key(&treatment.user_id) {
            report.record(DataWarning::OrphanedTreatment {
                treatment_id: treatment.treatment_id,
                user_id: treatment.user_id,
            });
            continue;
        }
        grouped.entry(treatment.user_id).or_default().push(treatment);
    }
    grouped
}

/// Deduplicates weigh-ins by explicit id, or by (user, date, weight) when the
/// source carries no id. Output is sorted per user in chronological order.
pub fn dedup_weigh_ins(weigh_ins: &[WeighIn], report: &mut DataQualityReport) -> Vec<WeighIn> {
    let mut unique: BTreeMap<WeighInKey, WeighIn> = BTreeMap::new();
    for weigh_in in weigh_ins {
        let key = WeighInKey::of(weigh_in);
        match unique.get_mut(&key) {
            Some(existing) => {
                report.record(DataWarning::DuplicateRecord {
                    table: WEIGH_INS_TABLE,
                    key: format!("{:?}", key),
                });
                if weigh_in_order(weigh_in) < weigh_in_order(existing) {
                    *existing = weigh_in.clone();
                }
            }
            None => {
                unique.insert(key, weigh_in.clone());
            }
        }
    }

    let mut deduped: Vec<WeighIn> = unique.into_values().collect();
    deduped.sort_by_key(weigh_in_order);
    deduped
}

/// Picks the treatment a weigh-in is measured against. `treatments` is
/// non-empty and sorted by start date.
fn attribute<'a>(
    treatments: &'a [Treatment],
    date: NaiveDate,
    policy: TreatmentPolicy,
) -> Option<&'a Treatment> {
    let earliest = treatments.first()?;
    match policy {
        TreatmentPolicy::Earliest => Some(earliest),
        TreatmentPolicy::PerTreatment => match treatments.iter().rev().find(|t| t.covers(date)) {
            Some(treatment) => Some(treatment),
            // left to the pre-start policy
            None if date < earliest.start_date => Some(earliest),
            None => None,
        },
    }
}

/// Joins weigh-ins to users through their treatments.
///
/// Any empty source table yields an empty result. Orphaned weigh-ins (unknown
/// user, a user without treatments, or a per-treatment weigh-in outside every
/// treatment window) are dropped and reported.
pub fn merge(
    dataset: &Dataset,
    policy: TreatmentPolicy,
    report: &mut DataQualityReport,
) -> Vec<MergedRecord> {
    if dataset.is_empty() {
        info!("At least one source table is empty, nothing to merge");
        return Vec::new();
    }

    let users = dedup_users(&dataset.users, report);
    let treatments = group_treatments(&dataset.treatments, &users, report);
    let weigh_ins = dedup_weigh_ins(&dataset.weigh_ins, report);

    let mut merged = Vec::with_capacity(weigh_ins.len());
    for weigh_in in weigh_ins {
        let joined = users.get(&weigh_in.user_id).and_then(|user| {
            let user_treatments = treatments.get(&weigh_in.user_id)?;
            attribute(user_treatments, weigh_in.date, policy).map(|t| (user, t))
        });

        match joined {
            Some((user, treatment)) => merged.push(MergedRecord {
                user: Arc::clone(user),
                treatment: treatment.clone(),
                weigh_in,
            }),
            None => report.record(DataWarning::OrphanedWeighIn {
                user_id: weigh_in.user_id,
                date: weigh_in.date,
            }),
        }
    }

    merged.sort_by(|a, b| {
        (a.user.user_id, a.treatment.key(), a.weigh_in.chrono_key())
            .cmp(&(b.user.user_id, b.treatment.key(), b.weigh_in.chrono_key()))
    });

    info!(
        "Merged {} weigh-ins across {} users ({} source weigh-ins)",
        merged.len(),
        users.len(),
        dataset.weigh_ins.len()
    );
    merged
}
