//! Selection state store.
//!
//! All mutation of a session's [`SelectionState`] goes through
//! [`SelectionStore::dispatch`]. A [`Command::Mutate`] batch is applied to a
//! copy, checked, and only then committed together with one undo snapshot,
//! so a batch is one logical step. History replay commands never snapshot.

use tracing::debug;

use vmask_models::{
    ClickPoint, ClickPointId, MaskData, ObjectAction, PendingMaskOperation, SelectionState,
};

use crate::error::{WorkflowError, WorkflowResult};
use crate::history::SelectionHistory;

/// One change to the selection state.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddClickPoint(ClickPoint),
    /// Also clears `selected_object` if it was this point.
    RemoveClickPoint(ClickPointId),
    /// Selected object must be one of the click points.
    SelectObject(Option<ClickPointId>),
    SetMaskData(Option<MaskData>),
    /// Also clears `selected_object`.
    SetSelectedFrameIndex(Option<usize>),
    SetPendingAction(Option<ObjectAction>),
    SetPendingMaskOperation(Option<PendingMaskOperation>),
    SetIsMaskEditMode(bool),
    /// Clears points, mask, selected object, pending action and pending
    /// mask operation. Edit mode and the selected frame are kept.
    ClearSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Mutate(Vec<Mutation>),
    UndoReplay,
    RedoReplay,
}

#[derive(Debug, Clone)]
pub struct SelectionStore {
    state: SelectionState,
    history: SelectionHistory,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new(crate::history::DEFAULT_HISTORY_CAPACITY)
    }
}

impl SelectionStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: SelectionState::default(),
            history: SelectionHistory::new(history_capacity),
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn history(&self) -> &SelectionHistory {
        &self.history
    }

    /// Run a command. Returns whether the state was replaced.
    ///
    /// A rejected batch leaves both the state and the history untouched.
    pub fn dispatch(&mut self, command: Command) -> WorkflowResult<bool> {
        match command {
            Command::Mutate(mutations) => {
                if mutations.is_empty() {
                    return Ok(false);
                }
                let mut next = self.state.clone();
                for mutation in mutations {
                    reduce(&mut next, mutation)?;
                }
                let before = std::mem::replace(&mut self.state, next);
                self.history.snapshot(before);
                Ok(true)
            }
            Command::UndoReplay => match self.history.undo(self.state.clone()) {
                Some(previous) => {
                    self.state = previous;
                    debug!(undo = self.history.undo_len(), redo = self.history.redo_len(), "Undo");
                    Ok(true)
                }
                None => Ok(false),
            },
            Command::RedoReplay => match self.history.redo(self.state.clone()) {
                Some(next) => {
                    self.state = next;
                    debug!(undo = self.history.undo_len(), redo = self.history.redo_len(), "Redo");
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Apply several mutations as one undo step.
    pub fn apply(&mut self, mutations: Vec<Mutation>) -> WorkflowResult<()> {
        self.dispatch(Command::Mutate(mutations)).map(|_| ())
    }

    pub fn add_click_point(&mut self, point: ClickPoint) -> WorkflowResult<()> {
        self.apply(vec![Mutation::AddClickPoint(point)])
    }

    pub fn remove_click_point(&mut self, id: &ClickPointId) -> WorkflowResult<()> {
        self.apply(vec![Mutation::RemoveClickPoint(id.clone())])
    }

    pub fn select_object(&mut self, id: Option<&ClickPointId>) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SelectObject(id.cloned())])
    }

    pub fn set_mask_data(&mut self, mask: Option<MaskData>) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SetMaskData(mask)])
    }

    pub fn set_selected_frame_index(&mut self, index: Option<usize>) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SetSelectedFrameIndex(index)])
    }

    pub fn set_pending_action(&mut self, action: Option<ObjectAction>) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SetPendingAction(action)])
    }

    pub fn set_pending_mask_operation(
        &mut self,
        operation: Option<PendingMaskOperation>,
    ) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SetPendingMaskOperation(operation)])
    }

    pub fn set_is_mask_edit_mode(&mut self, enabled: bool) -> WorkflowResult<()> {
        self.apply(vec![Mutation::SetIsMaskEditMode(enabled)])
    }

    pub fn clear_selection(&mut self) -> WorkflowResult<()> {
        self.apply(vec![Mutation::ClearSelection])
    }

    /// Returns `false` if there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.dispatch(Command::UndoReplay).unwrap_or(false)
    }

    /// Returns `false` if there was nothing to redo.
    pub fn redo(&mut self) -> bool {
        self.dispatch(Command::RedoReplay).unwrap_or(false)
    }

    /// Back to the initial state with empty history.
    pub fn reset(&mut self) {
        self.state = SelectionState::default();
        self.history.clear();
    }
}

fn reduce(state: &mut SelectionState, mutation: Mutation) -> WorkflowResult<()> {
    match mutation {
        Mutation::AddClickPoint(point) => {
            if state.click_point(&point.id).is_some() {
                return Err(WorkflowError::validation(format!(
                    "click point {} already exists",
                    point.id
                )));
            }
            state.click_points.push(point);
        }
        Mutation::RemoveClickPoint(id) => {
            let before = state.click_points.len();
            state.click_points.retain(|p| p.id != id);
            if state.click_points.len() == before {
                return Err(WorkflowError::validation(format!("unknown click point {id}")));
            }
            if state.selected_object.as_ref().is_some_and(|p| p.id == id) {
                state.selected_object = None;
            }
        }
        Mutation::SelectObject(None) => state.selected_object = None,
        Mutation::SelectObject(Some(id)) => {
            let point = state
                .click_point(&id)
                .cloned()
                .ok_or_else(|| WorkflowError::validation(format!("unknown click point {id}")))?;
            state.selected_object = Some(point);
        }
        Mutation::SetMaskData(mask) => state.mask_data = mask,
        Mutation::SetSelectedFrameIndex(index) => {
            state.selected_frame_index = index;
            state.selected_object = None;
        }
        Mutation::SetPendingAction(action) => state.pending_action = action,
        Mutation::SetPendingMaskOperation(operation) => state.pending_mask_operation = operation,
        Mutation::SetIsMaskEditMode(enabled) => state.is_mask_edit_mode = enabled,
        Mutation::ClearSelection => {
            state.click_points.clear();
            state.mask_data = None;
            state.selected_object = None;
            state.pending_action = None;
            state.pending_mask_operation = None;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn click(frame: usize, x: f64) -> ClickPoint {
        ClickPoint::new(frame, frame as f64 * 0.2, x, 40.0, format!("frame_{frame:05}.jpg"))
    }

    fn mask(prompt: &str) -> MaskData {
        MaskData {
            preview_image: format!("https://x/{prompt}.png"),
            text_prompt: Some(prompt.to_string()),
            source_width: Some(640),
            source_height: Some(360),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_frame_clears_selected_object() {
        let mut store = SelectionStore::default();
        let point = click(5, 10.0);
        let id = point.id.clone();
        store
            .apply(vec![
                Mutation::AddClickPoint(point),
                Mutation::SelectObject(Some(id.clone())),
            ])
            .unwrap();
        assert_eq!(store.state().selected_object.as_ref().map(|p| &p.id), Some(&id));

        store.set_selected_frame_index(Some(6)).unwrap();
        assert!(store.state().selected_object.is_none());
        assert_eq!(store.state().click_points.len(), 1);
    }

    #[test]
    fn test_select_unknown_point_rejected_without_snapshot() {
        let mut store = SelectionStore::default();
        let err = store.select_object(Some(&ClickPointId::from("ghost"))).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.history().undo_len(), 0);
        assert_eq!(store.state(), &SelectionState::default());
    }

    #[test]
    fn test_rejected_batch_is_atomic() {
        let mut store = SelectionStore::default();
        let result = store.apply(vec![
            Mutation::SetSelectedFrameIndex(Some(3)),
            Mutation::RemoveClickPoint(ClickPointId::from("ghost")),
        ]);
        assert!(result.is_err());
        assert_eq!(store.state().selected_frame_index, None);
    }

    #[test]
    fn test_remove_selected_point_clears_selection() {
        let mut store = SelectionStore::default();
        let point = click(1, 1.0);
        let id = point.id.clone();
        store.add_click_point(point).unwrap();
        store.select_object(Some(&id)).unwrap();
        store.remove_click_point(&id).unwrap();
        assert!(store.state().selected_object.is_none());
        assert!(store.state().selected_object_is_member());
    }

    #[test]
    fn test_clear_selection_keeps_edit_mode() {
        let mut store = SelectionStore::default();
        store.add_click_point(click(2, 5.0)).unwrap();
        store.set_mask_data(Some(mask("car"))).unwrap();
        store.set_pending_action(Some(ObjectAction::Extract)).unwrap();
        store.set_is_mask_edit_mode(true).unwrap();

        store.clear_selection().unwrap();
        let state = store.state();
        assert!(state.click_points.is_empty());
        assert!(state.mask_data.is_none());
        assert!(state.pending_action.is_none());
        assert!(state.is_mask_edit_mode);
    }

    #[test]
    fn test_batch_is_one_undo_step() {
        let mut store = SelectionStore::default();
        let point = click(5, 1.0);
        let id = point.id.clone();
        store
            .apply(vec![
                Mutation::SetSelectedFrameIndex(Some(5)),
                Mutation::AddClickPoint(point),
                Mutation::SelectObject(Some(id)),
            ])
            .unwrap();
        assert_eq!(store.history().undo_len(), 1);
        assert!(store.undo());
        assert_eq!(store.state(), &SelectionState::default());
    }

    #[test]
    fn test_undo_redo_do_not_snapshot() {
        let mut store = SelectionStore::default();
        store.set_selected_frame_index(Some(1)).unwrap();
        store.set_selected_frame_index(Some(2)).unwrap();

        assert!(store.undo());
        assert_eq!(store.history().undo_len(), 1);
        assert_eq!(store.history().redo_len(), 1);
        assert!(store.redo());
        assert_eq!(store.history().undo_len(), 2);
        assert_eq!(store.history().redo_len(), 0);
        assert_eq!(store.state().selected_frame_index, Some(2));
    }

    #[test]
    fn test_undo_redo_noop_on_empty() {
        let mut store = SelectionStore::default();
        assert!(!store.undo());
        assert!(!store.redo());
        assert_eq!(store.state(), &SelectionState::default());
    }

    #[test]
    fn test_mutation_clears_redo() {
        let mut store = SelectionStore::default();
        store.set_pending_action(Some(ObjectAction::Remove)).unwrap();
        store.undo();
        assert!(store.history().can_redo());
        store.set_is_mask_edit_mode(true).unwrap();
        assert!(!store.history().can_redo());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut store = SelectionStore::default();
        store.add_click_point(click(0, 0.0)).unwrap();
        store.undo();
        store.set_mask_data(Some(mask("dog"))).unwrap();
        store.reset();
        assert_eq!(store.state(), &SelectionState::default());
        assert!(!store.history().can_undo());
        assert!(!store.history().can_redo());
    }

    #[test]
    fn test_history_capacity() {
        let mut store = SelectionStore::new(100);
        for i in 0..150 {
            store.set_selected_frame_index(Some(i)).unwrap();
        }
        assert_eq!(store.history().undo_len(), 100);
        let mut undone = 0;
        while store.undo() {
            undone += 1;
        }
        assert_eq!(undone, 100);
        assert_eq!(store.state().selected_frame_index, Some(49));
    }

    /// Undo followed by redo restores the exact state for random operation sequences.
    #[test]
    fn test_undo_then_redo_restores_state() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut store = SelectionStore::default();
            let steps = rng.random_range(1..40);
            for _ in 0..steps {
                let mutation = match rng.random_range(0..8) {
                    0 => Mutation::AddClickPoint(click(rng.random_range(0..20), rng.random())),
                    1 => match store.state().click_points.first() {
                        Some(p) => Mutation::RemoveClickPoint(p.id.clone()),
                        None => Mutation::ClearSelection,
                    },
                    2 => Mutation::SelectObject(store.state().click_points.last().map(|p| p.id.clone())),
                    3 => Mutation::SetMaskData(Some(mask("car"))),
                    4 => Mutation::SetSelectedFrameIndex(Some(rng.random_range(0..20))),
                    5 => Mutation::SetPendingAction(Some(ObjectAction::Extract)),
                    6 => Mutation::SetIsMaskEditMode(rng.random()),
                    _ => Mutation::ClearSelection,
                };
                store.apply(vec![mutation]).unwrap();

                if rng.random_bool(0.3) {
                    store.undo();
                }
            }

            let before = store.state().clone();
            if store.undo() {
                assert!(store.redo());
                assert_eq!(store.state(), &before);
            }
            assert!(store.state().selected_object_is_member());
        }
    }
}
