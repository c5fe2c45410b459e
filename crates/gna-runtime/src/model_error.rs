//! Structured model errors
//!
//! A [`ModelError`] pinpoints why a model was rejected: a reason code, the
//! offending value and a locator naming the operation, operand, parameter
//! and shape dimension involved. Validation threads an [`ErrorContext`]
//! through its checks and narrows it as it descends, so the locator is
//! complete at the point the error is created.
//!
//! The process keeps at most one model error in a single slot. It must be
//! popped before another can be stored.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::fmt::Write as _;

/// Longest rendered error message in bytes.
pub const MAX_ERROR_MESSAGE_LEN: usize = 256;

/// Why a value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    NotTrue,
    NotFalse,
    NullNotAllowed,
    NullRequired,
    BelowRange,
    AboveRange,
    NotEqual,
    NotGreaterThanZero,
    NotZero,
    NotOne,
    NotInSet,
    NotMultiplicity,
    NotSuccess,
    NotAligned,
    ArgumentMissing,
    ArgumentInvalid,
    Runtime,
    Other,
}

impl ErrorReason {
    pub const fn description(self) -> &'static str {
        match self {
            ErrorReason::NotTrue => "value is not true",
            ErrorReason::NotFalse => "value is not false",
            ErrorReason::NullNotAllowed => "value must be set",
            ErrorReason::NullRequired => "value must not be set",
            ErrorReason::BelowRange => "value is below the allowed range",
            ErrorReason::AboveRange => "value is above the allowed range",
            ErrorReason::NotEqual => "value is not equal to the required value",
            ErrorReason::NotGreaterThanZero => "value is not greater than zero",
            ErrorReason::NotZero => "value is not zero",
            ErrorReason::NotOne => "value is not one",
            ErrorReason::NotInSet => "value is not in the supported set",
            ErrorReason::NotMultiplicity => "value is not a multiple of the required factor",
            ErrorReason::NotSuccess => "operation did not succeed",
            ErrorReason::NotAligned => "value is not properly aligned",
            ErrorReason::ArgumentMissing => "argument is missing",
            ErrorReason::ArgumentInvalid => "argument is invalid",
            ErrorReason::Runtime => "runtime failure",
            ErrorReason::Other => "unspecified failure",
        }
    }
}

/// Which part of the model the error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    ModelNumberOfOperations,
    ModelOperations,
    OperationType,
    OperationOperands,
    OperationNumberOfOperands,
    OperationParameters,
    OperationNumberOfParameters,
    OperandMode,
    OperandLayout,
    OperandType,
    OperandData,
    Parameter,
    ShapeNumberOfDimensions,
    ShapeDimensions,
    Internal,
}

impl ItemType {
    pub const fn name(self) -> &'static str {
        match self {
            ItemType::ModelNumberOfOperations => "number of operations",
            ItemType::ModelOperations => "operations",
            ItemType::OperationType => "operation type",
            ItemType::OperationOperands => "operands",
            ItemType::OperationNumberOfOperands => "number of operands",
            ItemType::OperationParameters => "parameters",
            ItemType::OperationNumberOfParameters => "number of parameters",
            ItemType::OperandMode => "operand mode",
            ItemType::OperandLayout => "operand layout",
            ItemType::OperandType => "operand type",
            ItemType::OperandData => "operand data",
            ItemType::Parameter => "parameter",
            ItemType::ShapeNumberOfDimensions => "number of shape dimensions",
            ItemType::ShapeDimensions => "shape dimension",
            ItemType::Internal => "internal",
        }
    }
}

/// Locator of the offending item; unset indices do not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorSource {
    pub item: ItemType,
    pub operation_index: Option<u32>,
    pub operand_index: Option<u32>,
    pub parameter_index: Option<u32>,
    pub shape_dimension_index: Option<u32>,
}

/// A rejected model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelError {
    pub reason: ErrorReason,
    /// The offending value, or the bound it violated when no value applies.
    pub value: i64,
    pub locator: ErrorSource,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    /// Render the error, at most [`MAX_ERROR_MESSAGE_LEN`] bytes long.
    pub fn message(&self) -> String {
        let mut message = format!(
            "{} (value {}) in {}",
            self.reason.description(),
            self.value,
            self.locator.item.name()
        );
        let locators = [
            ("operation", self.locator.operation_index),
            ("operand", self.locator.operand_index),
            ("parameter", self.locator.parameter_index),
            ("dimension", self.locator.shape_dimension_index),
        ];
        for (label, index) in locators {
            if let Some(index) = index {
                let _ = write!(message, ", {label} {index}");
            }
        }
        truncate_at_char_boundary(&mut message, MAX_ERROR_MESSAGE_LEN);
        message
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Locator under construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    operation: Option<u32>,
    operand: Option<u32>,
    parameter: Option<u32>,
    dimension: Option<u32>,
}

pub type Check = std::result::Result<(), ModelError>;

impl ErrorContext {
    /// Context of the whole model.
    pub fn model() -> Self {
        Self::default()
    }

    pub fn operation(self, index: usize) -> Self {
        Self {
            operation: Some(index as u32),
            ..self
        }
    }

    pub fn operand(self, index: usize) -> Self {
        Self {
            operand: Some(index as u32),
            ..self
        }
    }

    pub fn parameter(self, index: usize) -> Self {
        Self {
            parameter: Some(index as u32),
            ..self
        }
    }

    pub fn dimension(self, index: usize) -> Self {
        Self {
            dimension: Some(index as u32),
            ..self
        }
    }

    pub fn error(&self, item: ItemType, reason: ErrorReason, value: i64) -> ModelError {
        ModelError {
            reason,
            value,
            locator: ErrorSource {
                item,
                operation_index: self.operation,
                operand_index: self.operand,
                parameter_index: self.parameter,
                shape_dimension_index: self.dimension,
            },
        }
    }

    pub fn expect(
        &self,
        condition: bool,
        item: ItemType,
        reason: ErrorReason,
        value: i64,
    ) -> Check {
        if condition {
            Ok(())
        } else {
            Err(self.error(item, reason, value))
        }
    }

    pub fn expect_in_range(&self, value: usize, min: usize, max: usize, item: ItemType) -> Check {
        if value < min {
            return Err(self.error(item, ErrorReason::BelowRange, value as i64));
        }
        if value > max {
            return Err(self.error(item, ErrorReason::AboveRange, value as i64));
        }
        Ok(())
    }

    pub fn expect_greater_than_zero(&self, value: usize, item: ItemType) -> Check {
        self.expect(value > 0, item, ErrorReason::NotGreaterThanZero, value as i64)
    }

    pub fn expect_equal(&self, value: usize, expected: usize, item: ItemType) -> Check {
        self.expect(value == expected, item, ErrorReason::NotEqual, value as i64)
    }

    pub fn expect_multiple_of(&self, value: usize, factor: usize, item: ItemType) -> Check {
        self.expect(value % factor == 0, item, ErrorReason::NotMultiplicity, value as i64)
    }

    pub fn expect_in_set<T: PartialEq>(
        &self,
        value: &T,
        set: &[T],
        item: ItemType,
        code: i64,
    ) -> Check {
        self.expect(set.contains(value), item, ErrorReason::NotInSet, code)
    }

    pub fn expect_present<T>(
        &self,
        value: Option<T>,
        item: ItemType,
    ) -> std::result::Result<T, ModelError> {
        value.ok_or_else(|| self.error(item, ErrorReason::NullNotAllowed, 0))
    }
}

static LAST_ERROR: Mutex<Option<ModelError>> = parking_lot::const_mutex(None);

/// Process-wide single-slot store for the most recent model error.
pub struct ModelErrorReporter;

impl ModelErrorReporter {
    /// Keep `error` until it is popped.
    ///
    /// Fails with [`Error::ModelErrorPending`] while an earlier error has not
    /// been popped; the earlier error is kept.
    pub fn store(error: ModelError) -> Result<()> {
        let mut slot = LAST_ERROR.lock();
        if slot.is_some() {
            return Err(Error::ModelErrorPending);
        }
        *slot = Some(error);
        Ok(())
    }

    /// Take the pending error, or fail with [`Error::ErrorUnavailable`].
    pub fn pop() -> Result<ModelError> {
        LAST_ERROR.lock().take().ok_or(Error::ErrorUnavailable)
    }

    pub fn is_pending() -> bool {
        LAST_ERROR.lock().is_some()
    }

    /// Bounded human-readable rendering of `error`.
    pub fn error_string(error: &ModelError) -> String {
        error.message()
    }
}
