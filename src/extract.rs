use crate::error::{PipelineError, Result};
use crate::model::{Exercise, Movement, Sheet, WorkoutProgram};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref LEADING_DIGITS: Regex = Regex::new(r"^\s*\+?(\d+)").unwrap();
}

// Column order of a movement row. Column 3 (load) is never coerced.
const COL_NAME: usize = 0;
const COL_SETS: usize = 1;
const COL_REPS: usize = 2;
const COL_LOAD: usize = 3;
const COL_REST: usize = 4;
const COL_PROGRESSION: usize = 5;

/// How numeric cells that are not plain integers are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    /// Anything that is not a non-negative integer becomes 0
    #[default]
    ZeroOnInvalid,

    /// Use the leading digits of the cell ("100kg" is 100), else 0
    LeadingDigits,

    /// Reject the cell with a validation failure
    Strict,
}

impl CoercionPolicy {
    /// Coerce one cell
    ///
    /// # Returns
    /// * `Option<u32>` - The value, or `None` if the policy rejects the cell
    pub fn coerce(self, cell: &str) -> Option<u32> {
        let trimmed = cell.trim();
        match self {
            CoercionPolicy::ZeroOnInvalid => Some(trimmed.parse().unwrap_or(0)),
            CoercionPolicy::LeadingDigits => Some(
                LEADING_DIGITS
                    .captures(cell)
                    .and_then(|caps| caps[1].parse().ok())
                    .unwrap_or(0),
            ),
            CoercionPolicy::Strict => trimmed.parse().ok(),
        }
    }
}

/// Pure transformation from raw grids to the workout domain model
///
/// Deterministic: identical grids always produce an identical program.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExerciseExtractor {
    policy: CoercionPolicy,
}

impl ExerciseExtractor {
    pub fn new(policy: CoercionPolicy) -> Self {
        ExerciseExtractor { policy }
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    /// Build the program for one document
    ///
    /// # Arguments
    /// * `document_title` - Becomes `WorkoutProgram::document_title`
    /// * `sheets` - Grids in fetch order; hidden sheets are skipped
    ///
    /// # Errors
    /// * `ValidationFailure` only under [`CoercionPolicy::Strict`]
    pub fn extract(&self, document_title: &str, sheets: &[Sheet]) -> Result<WorkoutProgram> {
        let mut exercises = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            if let Some(exercise) = self.exercise(sheet)? {
                exercises.push(exercise);
            }
        }
        debug!(
            "extracted {} exercises from {:?}",
            exercises.len(),
            document_title
        );
        Ok(WorkoutProgram {
            document_title: document_title.to_string(),
            exercises,
        })
    }

    /// One exercise per visible sheet; `None` for hidden sheets
    pub fn exercise(&self, sheet: &Sheet) -> Result<Option<Exercise>> {
        if sheet.is_hidden() {
            return Ok(None);
        }

        let movements = sheet
            .rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, row)| self.movement(&sheet.title, index + 1, row))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Exercise {
            name: sheet.title.clone(),
            movements,
        }))
    }

    /// Map one data row to a movement
    ///
    /// Missing trailing cells read as empty.
    ///
    /// # Arguments
    /// * `sheet` - Sheet title, for error reporting
    /// * `row_number` - 1-based row number in the sheet, for error reporting
    /// * `row` - The row's cells
    pub fn movement(&self, sheet: &str, row_number: usize, row: &[String]) -> Result<Movement> {
        let cell = |col: usize| row.get(col).map(String::as_str).unwrap_or("");
        let number = |col: usize, column: &'static str| {
            self.policy
                .coerce(cell(col))
                .ok_or_else(|| PipelineError::Validation {
                    sheet: sheet.to_string(),
                    row: row_number,
                    column,
                    value: cell(col).to_string(),
                })
        };

        Ok(Movement {
            name: cell(COL_NAME).to_string(),
            sets: number(COL_SETS, "sets")?,
            reps: number(COL_REPS, "reps")?,
            load: cell(COL_LOAD).to_string(),
            rest: number(COL_REST, "rest")?,
            progression_rate: number(COL_PROGRESSION, "progression_rate")?,
        })
    }
}
