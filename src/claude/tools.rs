//! Claude tool definitions (JSON schemas)

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

/// A tool exposed to Claude over the Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The static tool catalog sent with every streamed turn.
pub static TOOLS: Lazy<Vec<ToolDefinition>> = Lazy::new(|| {
    vec![
        ToolDefinition {
            name: "read_file",
            description: "Read the contents of a file. Returns the file text. Paths are relative to the workspace root.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path to read",
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Line number to start reading from (1-based). Optional.",
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of lines to read. Optional.",
                    },
                },
                "required": ["path"],
            }),
        },
        ToolDefinition {
            name: "write_file",
            description: "Create or overwrite a file with the given content. Paths are relative to the workspace root.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path to write",
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file",
                    },
                },
                "required": ["path", "content"],
            }),
        },
        ToolDefinition {
            name: "edit_file",
            description: "Replace an exact text match in a file. The old_text must appear exactly once in the file.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path to edit",
                    },
                    "old_text": {
                        "type": "string",
                        "description": "Exact text to find and replace",
                    },
                    "new_text": {
                        "type": "string",
                        "description": "Replacement text",
                    },
                },
                "required": ["path", "old_text", "new_text"],
            }),
        },
        ToolDefinition {
            name: "bash",
            description: "Run a shell command and return its output. Commands run in the workspace root directory.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Shell command to execute",
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in seconds (default 30)",
                    },
                },
                "required": ["command"],
            }),
        },
        ToolDefinition {
            name: "glob",
            description: "Find files matching a glob pattern. Returns a list of matching file paths.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Glob pattern (e.g. '**/*.py', 'src/*.ts')",
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search in (default: workspace root)",
                    },
                },
                "required": ["pattern"],
            }),
        },
        ToolDefinition {
            name: "grep",
            description: "Search file contents for a regex pattern. Returns matching lines with file paths and line numbers.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regex pattern to search for",
                    },
                    "path": {
                        "type": "string",
                        "description": "File or directory to search in (default: workspace root)",
                    },
                    "include": {
                        "type": "string",
                        "description": "Glob pattern to filter files (e.g. '*.py')",
                    },
                },
                "required": ["pattern"],
            }),
        },
        ToolDefinition {
            name: "list_directory",
            description: "List the contents of a directory. Returns file and directory names.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory path (default: workspace root)",
                    },
                },
                "required": [],
            }),
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_shape() {
        assert_eq!(TOOLS.len(), 7);
        let names: Vec<&str> = TOOLS.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "read_file",
                "write_file",
                "edit_file",
                "bash",
                "glob",
                "grep",
                "list_directory"
            ]
        );
        for tool in TOOLS.iter() {
            assert_eq!(tool.input_schema["type"], "object");
            assert!(tool.input_schema["required"].is_array());
        }
    }
}
