use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;
use zip::ZipArchive;

use crate::cfg::build_cfg;
use crate::ir::{
    CallKind, CallSite, Class, ClassAccess, ExceptionHandler, Field, FieldAccess, FieldRef,
    Instruction, InstructionKind, Method, MethodAccess,
};
use crate::opcodes;

const ACC_PRIVATE: u16 = 0x0002;
const ACC_STATIC: u16 = 0x0008;
const ACC_SYNCHRONIZED: u16 = 0x0020;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_ENUM: u16 = 0x4000;

/// Snapshot of parsed artifacts and classes for a scan.
///
/// Classes found under the input come first; `target_count` marks where
/// classpath-only classes begin.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) classes: Vec<Class>,
    pub(crate) target_count: usize,
}

impl ScanOutput {
    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        classes: Vec::new(),
        target_count: 0,
    };

    scan_path(input, true, true, &mut output)?;
    output.target_count = output.classes.len();

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by_key(|entry| path_key(entry));

    for entry in classpath_entries {
        scan_path(&entry, false, true, &mut output)?;
    }

    debug!(
        classes = output.classes.len(),
        targets = output.target_count,
        artifacts = output.artifacts.len(),
        "scan finished"
    );
    Ok(output)
}

fn scan_path(path: &Path, is_input: bool, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        scan_dir(path, output)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("serialize artifact role")?,
        ])
    } else {
        None
    };

    match extension {
        "class" if is_module_info(path.to_string_lossy().as_ref()) => Ok(()),
        "class" => scan_class_file(path, roles, output),
        "jar" => scan_jar_file(path, roles, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, false, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(path: &Path, roles: Option<Vec<Value>>, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let artifact_index = push_path_artifact(path, roles, data.len() as u64, None, output);
    let class = parse_class(&data, artifact_index)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    output.classes.push(class);
    Ok(())
}

fn scan_jar_file(path: &Path, roles: Option<Vec<Value>>, output: &mut ScanOutput) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_path_artifact(path, roles, jar_len, None, output);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !is_module_info(&name) {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;

        let entry_uri = jar_entry_uri(path, &name);
        let artifact_index = push_artifact(entry_uri, entry.size(), Some(jar_index), None, output);
        let class = parse_class(&data, artifact_index)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        output.classes.push(class);
    }

    Ok(())
}

fn is_module_info(name: &str) -> bool {
    name.ends_with("module-info.class")
}

/// Parse one class file into the analysis IR.
pub(crate) fn parse_class(data: &[u8], artifact_index: i64) -> Result<Class> {
    let class_file = class_file::parse(data).context("malformed class file")?;
    let pool = ConstantPoolView {
        entries: class_file.constant_pool(),
    };

    let name = pool.class_name(class_file.this_class())?.to_string();
    let super_index = class_file.super_class();
    let super_name = if super_index == 0 {
        None
    } else {
        Some(pool.class_name(super_index)?.to_string())
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces().iter() {
        interfaces.push(pool.class_name(*interface)?.to_string());
    }

    let mut fields = Vec::new();
    for field in class_file.fields().iter() {
        let flags = field.access_flags().bits();
        fields.push(Field {
            name: pool.utf8(field.name_index())?.to_string(),
            descriptor: pool.utf8(field.descriptor_index())?.to_string(),
            access: FieldAccess {
                is_private: flags & ACC_PRIVATE != 0,
                is_static: flags & ACC_STATIC != 0,
                is_enum: flags & ACC_ENUM != 0,
            },
        });
    }

    let mut methods = Vec::new();
    for method in class_file.methods().iter() {
        let flags = method.access_flags().bits();
        let method_name = pool.utf8(method.name_index())?.to_string();
        let descriptor = pool.utf8(method.descriptor_index())?.to_string();

        let mut bytecode = Vec::new();
        let mut exception_handlers = Vec::new();
        for attribute in method.attributes().iter() {
            if let Attribute::Code {
                code,
                exception_table,
                ..
            } = attribute
            {
                bytecode = code.to_vec();
                for record in exception_table.iter() {
                    let catch_index = record.catch_type();
                    let catch_type = if catch_index == 0 {
                        None
                    } else {
                        Some(pool.class_name(catch_index)?.to_string())
                    };
                    exception_handlers.push(ExceptionHandler {
                        start_pc: u32::from(record.start_pc()),
                        end_pc: u32::from(record.end_pc()),
                        handler_pc: u32::from(record.handler_pc()),
                        catch_type,
                    });
                }
            }
        }

        let instructions = decode_instructions(&bytecode, &pool)
            .with_context(|| format!("failed to decode {name}.{method_name}{descriptor}"))?;
        let cfg = build_cfg(&bytecode, &instructions, &exception_handlers)
            .with_context(|| format!("failed to build CFG for {name}.{method_name}{descriptor}"))?;

        methods.push(Method {
            name: method_name,
            descriptor,
            access: MethodAccess {
                is_private: flags & ACC_PRIVATE != 0,
                is_abstract: flags & ACC_ABSTRACT != 0,
                is_synchronized: flags & ACC_SYNCHRONIZED != 0,
            },
            cfg,
            exception_handlers,
        });
    }

    let is_enum = class_file.access_flags().bits() & ACC_ENUM != 0;
    let enum_constant_count = if is_enum {
        fields.iter().filter(|field| field.access.is_enum).count()
    } else {
        0
    };

    Ok(Class {
        name,
        super_name,
        interfaces,
        access: ClassAccess { is_enum },
        fields,
        methods,
        enum_constant_count,
        artifact_index,
    })
}

/// Typed lookups over a parsed constant pool (index 0 is the unused slot).
struct ConstantPoolView<'a> {
    entries: &'a [ConstantPool],
}

impl<'a> ConstantPoolView<'a> {
    fn entry(&self, index: u16) -> Result<&'a ConstantPool> {
        self.entries
            .get(index as usize)
            .with_context(|| format!("invalid constant pool index: {index}"))
    }

    fn utf8(&self, index: u16) -> Result<&'a str> {
        match self.entry(index)? {
            ConstantPool::Utf8 { value } => Ok(value.as_str()),
            _ => anyhow::bail!("constant pool entry {index} is not Utf8"),
        }
    }

    fn class_name(&self, index: u16) -> Result<&'a str> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            _ => anyhow::bail!("constant pool entry {index} is not a Class"),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&'a str, &'a str)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((
                self.utf8(*name_index)?,
                self.utf8(*descriptor_index)?,
            )),
            _ => anyhow::bail!("constant pool entry {index} is not a NameAndType"),
        }
    }

    /// Resolve a field, method or interface method reference to owner, name and descriptor.
    fn member_ref(&self, index: u16) -> Result<(&'a str, &'a str, &'a str)> {
        let (class_index, name_and_type_index) = match self.entry(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => anyhow::bail!("constant pool entry {index} is not a member reference"),
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok((owner, name, descriptor))
    }

    fn invoke_dynamic(&self, index: u16) -> Result<(&'a str, &'a str)> {
        match self.entry(index)? {
            ConstantPool::InvokeDynamic {
                name_and_type_index,
                ..
            } => self.name_and_type(*name_and_type_index),
            _ => anyhow::bail!("constant pool entry {index} is not an InvokeDynamic"),
        }
    }

    fn is_string(&self, index: u16) -> bool {
        matches!(self.entry(index), Ok(ConstantPool::String { .. }))
    }
}

fn decode_instructions(code: &[u8], pool: &ConstantPoolView<'_>) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        let (opcode, kind) = match opcode {
            opcodes::ILOAD..=opcodes::ALOAD
            | opcodes::ISTORE..=opcodes::ASTORE
            | opcodes::RET
            | opcodes::IINC => (
                opcode,
                InstructionKind::LocalVar(u16::from(read_u8(code, offset + 1)?)),
            ),
            opcodes::WIDE => {
                let modified = read_u8(code, offset + 1)?;
                (
                    modified,
                    InstructionKind::LocalVar(read_u16(code, offset + 2)?),
                )
            }
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
                let index = if opcode == opcodes::LDC {
                    u16::from(read_u8(code, offset + 1)?)
                } else {
                    read_u16(code, offset + 1)?
                };
                let kind = if pool.is_string(index) {
                    InstructionKind::ConstString
                } else {
                    InstructionKind::Other(opcode)
                };
                (opcode, kind)
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let (owner, name, descriptor) = pool.member_ref(read_u16(code, offset + 1)?)?;
                (
                    opcode,
                    InstructionKind::FieldAccess(FieldRef {
                        owner: owner.to_string(),
                        name: name.to_string(),
                        descriptor: descriptor.to_string(),
                    }),
                )
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let (owner, name, descriptor) = pool.member_ref(read_u16(code, offset + 1)?)?;
                let kind = match opcode {
                    opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    _ => CallKind::Interface,
                };
                (
                    opcode,
                    InstructionKind::Invoke(CallSite {
                        owner: owner.to_string(),
                        name: name.to_string(),
                        descriptor: descriptor.to_string(),
                        kind,
                    }),
                )
            }
            opcodes::INVOKEDYNAMIC => {
                let (name, descriptor) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
                (
                    opcode,
                    InstructionKind::Invoke(CallSite {
                        owner: String::new(),
                        name: name.to_string(),
                        descriptor: descriptor.to_string(),
                        kind: CallKind::Dynamic,
                    }),
                )
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                let class_name = pool.class_name(read_u16(code, offset + 1)?)?;
                (opcode, InstructionKind::TypeRef(class_name.to_string()))
            }
            opcodes::MULTIANEWARRAY => {
                let descriptor = pool.class_name(read_u16(code, offset + 1)?)?;
                (
                    opcode,
                    InstructionKind::MultiNewArray {
                        descriptor: descriptor.to_string(),
                        dimensions: read_u8(code, offset + 3)?,
                    },
                )
            }
            _ => (opcode, InstructionKind::Other(opcode)),
        };
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

/// Byte length of the instruction starting at `offset`, operands included.
pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = read_u8(code, offset)?;
    let length = match opcode {
        opcodes::BIPUSH
        | opcodes::LDC
        | opcodes::ILOAD..=opcodes::ALOAD
        | opcodes::ISTORE..=opcodes::ASTORE
        | opcodes::RET
        | opcodes::NEWARRAY => 2,
        opcodes::SIPUSH
        | opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::IINC
        | opcodes::IFEQ..=opcodes::JSR
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::GETSTATIC..=opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF => 3,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC | opcodes::GOTO_W | opcodes::JSR_W => 5,
        opcodes::WIDE => {
            if read_u8(code, offset + 1)? == opcodes::IINC {
                6
            } else {
                4
            }
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_u32(code, base + 4)? as i32;
            let high = read_u32(code, base + 8)? as i32;
            let count = high
                .checked_sub(low)
                .and_then(|value| value.checked_add(1))
                .filter(|value| *value >= 0)
                .context("invalid tableswitch range")?;
            base + 12 + count as usize * 4 - offset
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_u32(code, base + 4)? as i32;
            if npairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count: {npairs}");
            }
            base + 8 + npairs as usize * 8 - offset
        }
        _ => 1,
    };
    Ok(length)
}

/// Alignment padding after a `tableswitch`/`lookupswitch` opcode.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .with_context(|| format!("bytecode truncated at offset {offset}"))
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("bytecode truncated at offset {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("bytecode truncated at offset {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Push a path-based artifact and return its index for parent linkage (e.g., JAR entries).
fn push_path_artifact(
    path: &Path,
    roles: Option<Vec<Value>>,
    len: u64,
    parent_index: Option<i64>,
    output: &mut ScanOutput,
) -> i64 {
    let uri = path_to_uri(path);
    push_artifact(uri, len, parent_index, roles, output)
}

fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    output: &mut ScanOutput,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = output.artifacts.len() as i64;
    output.artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
