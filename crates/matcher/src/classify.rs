//! Household relationship and age-group labels for matched peers.
//!
//! These are display hints derived from names and birth dates only. They are
//! guesses and are never used for matching itself.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::MemberRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    SpousePartner,
    ParentChild,
    Sibling,
    FamilyMember,
    PartnerSpouse,
    HouseholdMember,
}

impl Relationship {
    pub fn label(self) -> &'static str {
        match self {
            Relationship::SpousePartner => "Spouse/Partner",
            Relationship::ParentChild => "Parent/Child",
            Relationship::Sibling => "Sibling",
            Relationship::FamilyMember => "Family Member",
            Relationship::PartnerSpouse => "Partner/Spouse",
            Relationship::HouseholdMember => "Household Member",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    Minor,
    YoungAdult,
    Adult,
    MiddleAged,
    Senior,
}

impl AgeGroup {
    pub fn from_age(years: i64) -> Self {
        match years {
            y if y < 18 => AgeGroup::Minor,
            y if y < 30 => AgeGroup::YoungAdult,
            y if y < 50 => AgeGroup::Adult,
            y if y < 65 => AgeGroup::MiddleAged,
            _ => AgeGroup::Senior,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeGroup::Minor => "Minor",
            AgeGroup::YoungAdult => "Young Adult",
            AgeGroup::Adult => "Adult",
            AgeGroup::MiddleAged => "Middle-aged",
            AgeGroup::Senior => "Senior",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub trait Classifier: Send + Sync {
    fn relationship(&self, subject: &MemberRecord, peer: &MemberRecord) -> Relationship;
    fn age_group(&self, member: &MemberRecord, today: NaiveDate) -> Option<AgeGroup>;
}

/// Last-name and age-gap heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HouseholdClassifier;

const SPOUSE_MAX_GAP_YEARS: i64 = 5;
const PARENT_MIN_GAP_YEARS: i64 = 15;

fn last_name(full_name: Option<&str>) -> Option<String> {
    full_name?
        .split_whitespace()
        .next_back()
        .map(str::to_lowercase)
}

fn whole_years(days: i64) -> i64 {
    days / 365
}

impl Classifier for HouseholdClassifier {
    fn relationship(&self, subject: &MemberRecord, peer: &MemberRecord) -> Relationship {
        let (Some(ours), Some(theirs)) = (
            last_name(subject.full_name.as_deref()),
            last_name(peer.full_name.as_deref()),
        ) else {
            return Relationship::HouseholdMember;
        };

        if ours != theirs {
            return Relationship::PartnerSpouse;
        }
        match (subject.birth_date, peer.birth_date) {
            (Some(a), Some(b)) => {
                let gap = whole_years((a - b).num_days().abs());
                if gap < SPOUSE_MAX_GAP_YEARS {
                    Relationship::SpousePartner
                } else if gap > PARENT_MIN_GAP_YEARS {
                    Relationship::ParentChild
                } else {
                    Relationship::Sibling
                }
            }
            _ => Relationship::FamilyMember,
        }
    }

    fn age_group(&self, member: &MemberRecord, today: NaiveDate) -> Option<AgeGroup> {
        let born = member.birth_date?;
        let days = (today - born).num_days();
        if days < 0 {
            return None;
        }
        Some(AgeGroup::from_age(whole_years(days)))
    }
}
