//! Execution points and the objects they are taken from.
//!
//! A live call-stack frame and a captured traceback entry both name a code
//! object, the offset of the instruction being executed and the current
//! line. An [`ExecutionPoint`] is that triple, built per request and never
//! cached.

use std::sync::Arc;

use whence_bytecode::CodeObject;

use crate::error::ResolutionError;

/// A call-stack frame of the host runtime.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: Arc<CodeObject>,
    /// Offset of the instruction currently executing.
    pub lasti: u32,
    pub lineno: u32,
}

/// One entry of a captured exception traceback.
#[derive(Debug, Clone)]
pub struct TracebackEntry {
    pub code: Arc<CodeObject>,
    /// Offset of the last instruction attempted.
    pub lasti: u32,
    pub lineno: u32,
}

impl Frame {
    /// A frame stopped at `lasti`, with the line taken from the code's line
    /// table.
    pub fn at(code: Arc<CodeObject>, lasti: u32) -> Result<Self, ResolutionError> {
        let point = ExecutionPoint::at_offset(code, lasti)?;
        Ok(Frame {
            code: point.code,
            lasti: point.offset,
            lineno: point.lineno,
        })
    }
}

impl TracebackEntry {
    pub fn at(code: Arc<CodeObject>, lasti: u32) -> Result<Self, ResolutionError> {
        let point = ExecutionPoint::at_offset(code, lasti)?;
        Ok(TracebackEntry {
            code: point.code,
            lasti: point.offset,
            lineno: point.lineno,
        })
    }
}

/// Where execution currently is: a code object, an instruction offset and
/// the line being executed.
#[derive(Debug, Clone)]
pub struct ExecutionPoint {
    pub code: Arc<CodeObject>,
    pub offset: u32,
    pub lineno: u32,
}

impl ExecutionPoint {
    pub fn new(code: Arc<CodeObject>, offset: u32, lineno: u32) -> Self {
        ExecutionPoint {
            code,
            offset,
            lineno,
        }
    }

    /// The point at `offset`, with the line derived from the code's line
    /// table.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::OffsetOutOfRange`] when `offset` is not the offset
    /// of one of the code's instructions.
    pub fn at_offset(code: Arc<CodeObject>, offset: u32) -> Result<Self, ResolutionError> {
        let lineno = match (code.instruction_at(offset), code.line_for_offset(offset)) {
            (Some(_), Some(line)) => line,
            _ => return Err(out_of_range(&code, offset)),
        };
        Ok(ExecutionPoint::new(code, offset, lineno))
    }

    /// Identity of the code object, for memo keys.
    pub(crate) fn code_id(&self) -> usize {
        Arc::as_ptr(&self.code) as usize
    }
}

pub(crate) fn out_of_range(code: &CodeObject, offset: u32) -> ResolutionError {
    ResolutionError::OffsetOutOfRange {
        code: code.name.clone(),
        offset,
        len: code.code.len(),
    }
}

impl From<&Frame> for ExecutionPoint {
    fn from(frame: &Frame) -> Self {
        ExecutionPoint::new(Arc::clone(&frame.code), frame.lasti, frame.lineno)
    }
}

impl From<Frame> for ExecutionPoint {
    fn from(frame: Frame) -> Self {
        ExecutionPoint::new(frame.code, frame.lasti, frame.lineno)
    }
}

impl From<&TracebackEntry> for ExecutionPoint {
    fn from(entry: &TracebackEntry) -> Self {
        ExecutionPoint::new(Arc::clone(&entry.code), entry.lasti, entry.lineno)
    }
}

impl From<TracebackEntry> for ExecutionPoint {
    fn from(entry: TracebackEntry) -> Self {
        ExecutionPoint::new(entry.code, entry.lasti, entry.lineno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whence_bytecode::{Compiler, RuntimeVersion};
    use whence_python::parse_module;

    fn module(source: &str) -> Arc<CodeObject> {
        let ast = parse_module(source).unwrap();
        Compiler::new(RuntimeVersion::V3_8)
            .compile_module(&ast, "frame.py")
            .unwrap()
    }

    #[test]
    fn line_comes_from_the_line_table() {
        let code = module("a = 1\nb = a + 2\n");
        let add = code
            .instructions
            .iter()
            .find(|i| i.opname() == "BINARY_ADD")
            .unwrap()
            .offset;
        let point = ExecutionPoint::at_offset(Arc::clone(&code), add).unwrap();
        assert_eq!(point.lineno, 2);
        assert_eq!(point.offset, add);

        let frame = Frame::at(code, add).unwrap();
        assert_eq!(ExecutionPoint::from(&frame).lineno, 2);
    }

    #[test]
    fn offsets_must_be_instruction_boundaries() {
        let code = module("a = 1\n");
        assert!(matches!(
            ExecutionPoint::at_offset(Arc::clone(&code), 1),
            Err(ResolutionError::OffsetOutOfRange { offset: 1, .. })
        ));
        let past_end = code.code.len() as u32;
        assert!(TracebackEntry::at(code, past_end).is_err());
    }

    #[test]
    fn points_share_their_code() {
        let code = module("a = 1\n");
        let entry = TracebackEntry::at(Arc::clone(&code), 0).unwrap();
        let point = ExecutionPoint::from(entry);
        assert!(Arc::ptr_eq(&point.code, &code));
    }
}
