//! Entry points used by screens, calculators and hooks.
//!
//! Each call is one transaction or one read. Children are listed newest
//! first.

use crate::error::Result;
use crate::model::{
    Calculation, CalculationPatch, Draft, Model, NewCalculation, NewNote, NewPhoto, NewProject,
    Note, NotePatch, Photo, PhotoPatch, Project, ProjectPatch, ProjectSort, PROJECT_ID,
};
use crate::query::{Collection, Query, SortOrder};
use crate::store::Store;
use crate::subscriptions::LiveQuery;
use crate::types::{RowId, CREATED_AT_COLUMN};

fn children<T: Model>(project_id: &RowId) -> Query<T> {
    Query::all()
        .where_eq(PROJECT_ID, project_id)
        .sort_by(CREATED_AT_COLUMN, SortOrder::Desc)
}

impl Store {
    // --- Projects ---

    pub fn get_project(&self, id: &RowId) -> Result<Project> {
        self.find(id)
    }

    /// Also finds soft-deleted projects.
    pub fn get_project_including_deleted(&self, id: &RowId) -> Result<Project> {
        self.find_including_deleted(id)
    }

    pub fn list_projects(&self, sort: ProjectSort) -> Result<Collection<Project>> {
        self.fetch(&sort.query())
    }

    pub fn observe_projects(&self, sort: ProjectSort) -> Result<LiveQuery<Project>> {
        self.observe(&sort.query())
    }

    pub fn create_project(&self, project: NewProject) -> Result<Project> {
        self.write(|w| w.create(project))
    }

    pub fn update_project(&self, id: &RowId, patch: ProjectPatch) -> Result<Project> {
        self.write(|w| w.update(id, patch))
    }

    /// Soft-delete a project together with its calculations, notes and photos.
    /// Returns how many rows were hidden.
    pub fn delete_project(&self, id: &RowId) -> Result<usize> {
        self.write(|w| w.mark_tree_as_deleted::<Project>(id))
    }

    /// Permanently remove a project and everything attached to it.
    pub fn destroy_project(&self, id: &RowId) -> Result<usize> {
        self.write(|w| w.destroy_permanently::<Project>(id))
    }

    pub fn toggle_favorite(&self, id: &RowId) -> Result<Project> {
        self.write(|w| {
            let project: Project = w.find(id)?;
            w.update(
                id,
                ProjectPatch {
                    is_favorite: Some(!project.is_favorite),
                    ..Default::default()
                },
            )
        })
    }

    // --- Calculations ---

    pub fn add_calculation_to_project(
        &self,
        project_id: &RowId,
        calculation: NewCalculation,
    ) -> Result<Calculation> {
        self.write(|w| w.create(calculation.attach(project_id)))
    }

    pub fn update_calculation(&self, id: &RowId, patch: CalculationPatch) -> Result<Calculation> {
        self.write(|w| w.update(id, patch))
    }

    pub fn delete_calculation(&self, id: &RowId) -> Result<()> {
        self.write(|w| w.mark_as_deleted::<Calculation>(id))
    }

    pub fn list_calculations(&self, project_id: &RowId) -> Result<Collection<Calculation>> {
        self.fetch(&children(project_id))
    }

    pub fn observe_calculations(&self, project_id: &RowId) -> Result<LiveQuery<Calculation>> {
        self.observe(&children(project_id))
    }

    // --- Notes ---

    pub fn add_note(&self, project_id: &RowId, note: NewNote) -> Result<Note> {
        self.write(|w| w.create(note.attach(project_id)))
    }

    pub fn update_note(&self, id: &RowId, patch: NotePatch) -> Result<Note> {
        self.write(|w| w.update(id, patch))
    }

    pub fn delete_note(&self, id: &RowId) -> Result<()> {
        self.write(|w| w.mark_as_deleted::<Note>(id))
    }

    pub fn list_notes(&self, project_id: &RowId) -> Result<Collection<Note>> {
        self.fetch(&children(project_id))
    }

    pub fn observe_notes(&self, project_id: &RowId) -> Result<LiveQuery<Note>> {
        self.observe(&children(project_id))
    }

    // --- Photos ---

    pub fn add_photo(&self, project_id: &RowId, photo: NewPhoto) -> Result<Photo> {
        self.write(|w| w.create(photo.attach(project_id)))
    }

    pub fn update_photo(&self, id: &RowId, patch: PhotoPatch) -> Result<Photo> {
        self.write(|w| w.update(id, patch))
    }

    pub fn delete_photo(&self, id: &RowId) -> Result<()> {
        self.write(|w| w.mark_as_deleted::<Photo>(id))
    }

    pub fn list_photos(&self, project_id: &RowId) -> Result<Collection<Photo>> {
        self.fetch(&children(project_id))
    }

    pub fn observe_photos(&self, project_id: &RowId) -> Result<LiveQuery<Photo>> {
        self.observe(&children(project_id))
    }
}
