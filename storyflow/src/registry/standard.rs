//! The built-in flows of the simulation.

use super::{Fallback, InputSpec, PipelineRegistry, StepSpec};
use crate::core::PipelineKind;
use crate::errors::RegistryError;

fn game_setup() -> InputSpec {
    InputSpec::new("game_setup").or(Fallback::snapshot("/setup"))
}

fn characters() -> InputSpec {
    InputSpec::new("characters").or(Fallback::snapshot("/characters"))
}

fn segment_transcript() -> InputSpec {
    InputSpec::new("segment_transcript").or(Fallback::snapshot("/dialogue/current_segment"))
}

fn day_transcript() -> InputSpec {
    InputSpec::new("day_transcript").or(Fallback::snapshot("/dialogue/day"))
}

fn story_arc() -> InputSpec {
    InputSpec::new("story_arc")
        .or(Fallback::artifact("story_arc_update"))
        .or(Fallback::snapshot("/story_arc"))
}

impl PipelineRegistry {
    /// Returns the registry declaring the three built-in flows.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in definitions; the result comes from the
    /// same validation custom flows go through.
    pub fn standard() -> Result<Self, RegistryError> {
        Self::builder()
            .flow(
                PipelineKind::NewGame,
                [
                    StepSpec::new("character_roster", "character_creator")
                        .consumes_input(game_setup())
                        .produces(["characters"]),
                    StepSpec::new("story_arc", "arc_planner")
                        .consumes("characters")
                        .consumes_input(game_setup())
                        .produces(["story_arc"]),
                    StepSpec::new("opening_scene", "scene_writer")
                        .consumes("characters")
                        .consumes("story_arc")
                        .produces(["opening_scene"]),
                ],
            )
            .flow(
                PipelineKind::SegmentTransition,
                [
                    StepSpec::new("relationship_analysis", "relationship_analyst")
                        .consumes_input(segment_transcript())
                        .consumes_input(characters())
                        .produces(["relationship_updates"]),
                    StepSpec::new("character_development", "character_developer")
                        .consumes_input(characters())
                        .consumes("relationship_updates")
                        .produces(["character_updates"]),
                    StepSpec::new("segment_summary", "prose_summarizer")
                        .consumes_input(segment_transcript())
                        .consumes("character_updates")
                        .produces(["segment_summary"]),
                    StepSpec::new("apply_world_state", "world_state_applier")
                        .consumes("relationship_updates")
                        .consumes("character_updates"),
                    StepSpec::new("next_scene", "scene_writer")
                        .consumes("segment_summary")
                        .consumes_input(story_arc())
                        .produces(["next_scene"]),
                ],
            )
            .flow(
                PipelineKind::EndOfDay,
                [
                    StepSpec::new("day_relationships", "relationship_analyst")
                        .consumes_input(day_transcript())
                        .consumes_input(characters())
                        .produces(["day_relationships"]),
                    StepSpec::new("character_arcs", "character_developer")
                        .consumes_input(characters())
                        .consumes("day_relationships")
                        .produces(["character_arcs"]),
                    StepSpec::new("arc_planning", "arc_planner")
                        .consumes("character_arcs")
                        .consumes_input(story_arc())
                        .produces(["story_arc_update"]),
                    StepSpec::new("day_summary", "prose_summarizer")
                        .consumes_input(day_transcript())
                        .consumes("day_relationships")
                        .produces(["day_summary"]),
                    StepSpec::new("next_day_scene", "scene_writer")
                        .consumes("day_summary")
                        .consumes("story_arc_update")
                        .produces(["next_day_scene"]),
                ],
            )
            .build()
    }
}
