//! Minimal class file writer for loader and end-to-end tests.

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_SUPER: u16 = 0x0020;
pub(crate) const ACC_SYNCHRONIZED: u16 = 0x0020;
pub(crate) const ACC_ENUM: u16 = 0x4000;

const MAJOR_VERSION: u16 = 52;

#[derive(Clone, Debug, PartialEq)]
enum Constant {
    Utf8(String),
    Class(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    NameAndType(u16, u16),
}

struct Member {
    access: u16,
    name: u16,
    descriptor: u16,
    code: Option<Vec<u8>>,
}

/// Builds a class file byte by byte; constant pool entries are deduplicated.
pub(crate) struct ClassFileBuilder {
    constants: Vec<Constant>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
}

impl ClassFileBuilder {
    pub(crate) fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = Self {
            constants: Vec::new(),
            access: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.class_ref(name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.class_ref(super_name);
        }
        builder
    }

    pub(crate) fn set_access(&mut self, access: u16) {
        self.access = access;
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.class_ref(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_field(&mut self, access: u16, name: &str, descriptor: &str) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.fields.push(Member {
            access,
            name,
            descriptor,
            code: None,
        });
    }

    /// Adds a method; an empty `code` produces a method without a Code attribute.
    pub(crate) fn add_method(&mut self, access: u16, name: &str, descriptor: &str, code: Vec<u8>) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.methods.push(Member {
            access,
            name,
            descriptor,
            code: if code.is_empty() { None } else { Some(code) },
        });
    }

    pub(crate) fn class_ref(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.constant(Constant::Class(name))
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class_ref(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        self.constant(Constant::Fieldref(owner, name_and_type))
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class_ref(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        self.constant(Constant::Methodref(owner, name_and_type))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.constant(Constant::NameAndType(name, descriptor))
    }

    fn utf8(&mut self, value: &str) -> u16 {
        self.constant(Constant::Utf8(value.to_string()))
    }

    fn constant(&mut self, constant: Constant) -> u16 {
        let position = match self.constants.iter().position(|entry| *entry == constant) {
            Some(position) => position,
            None => {
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        (position + 1) as u16
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let code_name = if self.methods.iter().any(|method| method.code.is_some()) {
            self.utf8("Code")
        } else {
            0
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, MAJOR_VERSION);
        push_u16(&mut bytes, (self.constants.len() + 1) as u16);
        for constant in &self.constants {
            match constant {
                Constant::Utf8(value) => {
                    bytes.push(1);
                    push_u16(&mut bytes, value.len() as u16);
                    bytes.extend_from_slice(value.as_bytes());
                }
                Constant::Class(name) => {
                    bytes.push(7);
                    push_u16(&mut bytes, *name);
                }
                Constant::Fieldref(owner, name_and_type) => {
                    bytes.push(9);
                    push_u16(&mut bytes, *owner);
                    push_u16(&mut bytes, *name_and_type);
                }
                Constant::Methodref(owner, name_and_type) => {
                    bytes.push(10);
                    push_u16(&mut bytes, *owner);
                    push_u16(&mut bytes, *name_and_type);
                }
                Constant::NameAndType(name, descriptor) => {
                    bytes.push(12);
                    push_u16(&mut bytes, *name);
                    push_u16(&mut bytes, *descriptor);
                }
            }
        }

        push_u16(&mut bytes, self.access);
        push_u16(&mut bytes, self.this_class);
        push_u16(&mut bytes, self.super_class);
        push_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            push_u16(&mut bytes, *interface);
        }

        push_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            push_member(&mut bytes, field, code_name);
        }
        push_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            push_member(&mut bytes, method, code_name);
        }

        push_u16(&mut bytes, 0);
        bytes
    }
}

fn push_member(bytes: &mut Vec<u8>, member: &Member, code_name: u16) {
    push_u16(bytes, member.access);
    push_u16(bytes, member.name);
    push_u16(bytes, member.descriptor);
    match &member.code {
        Some(code) => {
            push_u16(bytes, 1);
            push_u16(bytes, code_name);
            // max_stack, max_locals, code_length, code, exception table and attribute counts
            push_u32(bytes, (2 + 2 + 4 + code.len() + 2 + 2) as u32);
            push_u16(bytes, 8);
            push_u16(bytes, 8);
            push_u32(bytes, code.len() as u32);
            bytes.extend_from_slice(code);
            push_u16(bytes, 0);
            push_u16(bytes, 0);
        }
        None => push_u16(bytes, 0),
    }
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}
