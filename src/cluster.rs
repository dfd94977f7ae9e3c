use crate::geo::{Bounds, LngLat, ScreenPoint};
use crate::record::Sighting;

pub const DEFAULT_THRESHOLD_PX: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster<'a> {
    /// Arithmetic mean of the member positions.
    pub anchor: LngLat,
    /// Never empty. Most recent first.
    pub members: Vec<&'a Sighting>,
}

impl<'a> Cluster<'a> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_single(&self) -> bool {
        self.members.len() == 1
    }

    pub fn latest(&self) -> &'a Sighting {
        self.members[0]
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(self.members.iter().map(|s| s.position))
            .unwrap_or(Bounds { south_west: self.anchor, north_east: self.anchor })
    }
}

/// Greedy single-pass grouping.
///
/// Sightings are visited in input order. Each unclaimed sighting seeds a
/// cluster and claims every other unclaimed sighting within `threshold_px`
/// of it. A sighting claimed by an earlier seed stays there even when it is
/// also close to a later seed, so identical input order gives identical output.
pub fn cluster<'a, F>(sightings: &[&'a Sighting], project: F, threshold_px: f64) -> Vec<Cluster<'a>>
where
    F: Fn(LngLat) -> ScreenPoint,
{
    let points: Vec<ScreenPoint> = sightings.iter().map(|s| project(s.position)).collect();
    let threshold_sq = threshold_px * threshold_px;
    let mut claimed = vec![false; sightings.len()];
    let mut clusters = Vec::new();

    for seed in 0..sightings.len() {
        if claimed[seed] {
            continue;
        }
        claimed[seed] = true;
        let mut member_idx = vec![seed];

        for other in (seed + 1)..sightings.len() {
            if !claimed[other] && points[seed].distance_squared(&points[other]) < threshold_sq {
                claimed[other] = true;
                member_idx.push(other);
            }
        }

        let count = member_idx.len() as f64;
        let (sum_lng, sum_lat) = member_idx.iter().fold((0.0, 0.0), |(x, y), &i| {
            (x + sightings[i].position.lng, y + sightings[i].position.lat)
        });

        let mut members: Vec<&'a Sighting> = member_idx.iter().map(|&i| sightings[i]).collect();
        members.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        clusters.push(Cluster {
            anchor: LngLat::new(sum_lng / count, sum_lat / count),
            members,
        });
    }

    clusters
}
