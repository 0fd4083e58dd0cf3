//! Dictionary sample domain.
//!
//! A small but complete set of entities and changes that exercises every
//! engine feature:
//! - [`Word`] holds an optional reference (its antonym), cleared when the
//!   antonym is deleted
//! - [`Definition`] requires its word and is ordered within it
//! - [`Example`] requires its definition, so deleting a word cascades two
//!   levels down
//!
//! [`registry`] returns a [`TypeRegistry`] with every type registered.

mod changes;
mod models;

pub use changes::{
    AddTagChange, NewDefinitionChange, NewExampleChange, NewWordChange, SetAntonymChange,
    SetDefinitionTextChange, SetExampleTextChange, SetPartOfSpeechChange, SetWordNoteChange,
    SetWordTextChange,
};
pub use models::{Definition, Example, PartOfSpeech, Word};

use harmony_model::{DeleteChange, RegistryResult, SetOrderChange, TypeRegistry};

/// Registers the sample entities and changes.
pub fn register(registry: &mut TypeRegistry) -> RegistryResult<()> {
    registry
        .register_entity::<Word>()?
        .register_entity::<Definition>()?
        .register_entity::<Example>()?
        .register_change::<NewWordChange>()?
        .register_change::<SetWordTextChange>()?
        .register_change::<SetWordNoteChange>()?
        .register_change::<SetAntonymChange>()?
        .register_change::<AddTagChange>()?
        .register_change::<NewDefinitionChange>()?
        .register_change::<SetDefinitionTextChange>()?
        .register_change::<SetPartOfSpeechChange>()?
        .register_change::<SetOrderChange<Definition>>()?
        .register_change::<NewExampleChange>()?
        .register_change::<SetExampleTextChange>()?
        .register_change::<DeleteChange<Word>>()?
        .register_change::<DeleteChange<Definition>>()?
        .register_change::<DeleteChange<Example>>()?;
    Ok(())
}

/// A fresh registry holding the sample domain.
pub fn registry() -> RegistryResult<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    register(&mut registry)?;
    Ok(registry)
}
