//! One-time sample data for a store that has never held a project.

use crate::error::Result;
use crate::model::{
    Draft, Model, NewCalculation, NewNote, NewProject, Project, ProjectStatus, StructuredMap,
};
use crate::query::Query;
use crate::store::Store;
use tracing::{debug, info};

fn sample_projects() -> Vec<NewProject> {
    vec![
        NewProject {
            description: Some("Raglan pullover in merino".into()),
            yarn_type: Some("Merino DK".into()),
            needle_size: Some("4 mm".into()),
            density: Some("22 sts x 30 rows".into()),
            tags: Some("sweater, raglan".into()),
            ..NewProject::new("Светр", ProjectStatus::InProgress)
        },
        NewProject {
            yarn_type: Some("Alpaca".into()),
            needle_size: Some("3.5 mm".into()),
            tags: Some("hat".into()),
            ..NewProject::new("Шапка", ProjectStatus::Planned)
        },
        NewProject {
            progress: Some(100.0),
            is_favorite: true,
            tags: Some("socks".into()),
            ..NewProject::new("Шкарпетки", ProjectStatus::Completed)
        },
    ]
}

/// Insert the sample projects into a store that has never held a project.
/// Returns how many projects were created.
///
/// Seeding happens at most once per database file. A store that already
/// has projects, soft-deleted ones included, is marked as seeded without
/// inserting anything.
pub fn seed_if_empty(store: &Store) -> Result<usize> {
    if store.is_seeded() {
        debug!("sample data already written once, not seeding");
        return Ok(0);
    }

    let existing = store.count(&Query::<Project>::all().including_deleted())?;
    if existing > 0 {
        debug!(existing, "store already has projects, not seeding");
        store.write(|w| {
            w.mark_seeded();
            Ok(())
        })?;
        return Ok(0);
    }

    let created = store.write(|w| {
        let mut created = 0;
        for draft in sample_projects() {
            let project = w.create(draft)?;
            created += 1;

            if project.status == ProjectStatus::InProgress {
                w.create(
                    NewCalculation {
                        input_values: StructuredMap::new().with("width", 50).with("height", 60),
                        results: StructuredMap::new().with("yarnNeeded", 450),
                        ..NewCalculation::new("yarn", "Yarn amount")
                    }
                    .attach(project.id()),
                )?;
                w.create(
                    NewNote::new("Gauge", "Swatch after blocking: 22 sts x 30 rows")
                        .attach(project.id()),
                )?;
            }
        }
        w.mark_seeded();
        Ok(created)
    })?;

    info!(projects = created, "seeded sample data");
    Ok(created)
}
