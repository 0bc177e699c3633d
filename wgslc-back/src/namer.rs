//! Identifier management for the textual backends.
//!
//! Every emitted name goes through a [`Namer`], which owns the target's
//! reserved-word list and the set of names already handed out. Collisions
//! append a numeric suffix. Backends pre-register their polyfill helper
//! names so user identifiers can never shadow them.

use wgslc_core::{
    Constant, FastHashMap, Function, GlobalVariable, Handle, LocalVariable, Module, Type,
};

/// What a generated name belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NameKey {
    Constant(Handle<Constant>),
    GlobalVariable(Handle<GlobalVariable>),
    Type(Handle<Type>),
    StructMember(Handle<Type>, u32),
    Function(Handle<Function>),
    FunctionArgument(Handle<Function>, u32),
    FunctionLocal(Handle<Function>, Handle<LocalVariable>),
    /// Indexed into `module.entry_points`.
    EntryPoint(u32),
}

pub struct Namer {
    /// Count of names handed out per sanitized base.
    unique: FastHashMap<String, u32>,
    reserved: Vec<&'static str>,
    /// Fold case before collision checks, for targets where identifiers are
    /// case-insensitive.
    case_insensitive: bool,
}

impl Namer {
    pub fn new(reserved: &[&'static str], case_insensitive: bool) -> Self {
        Namer {
            unique: FastHashMap::default(),
            reserved: reserved.to_vec(),
            case_insensitive,
        }
    }

    fn key_of(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn is_reserved(&self, name: &str) -> bool {
        if self.case_insensitive {
            self.reserved
                .iter()
                .any(|&word| word.eq_ignore_ascii_case(name))
        } else {
            self.reserved.contains(&name)
        }
    }

    /// Claim `name` exactly; used for helper functions whose spelling the
    /// backend controls.
    pub fn reserve(&mut self, name: &str) {
        self.unique.insert(self.key_of(name), 0);
    }

    /// Produce a unique identifier based on `label`.
    pub fn call(&mut self, label: &str) -> String {
        let mut base = sanitize(label);
        if self.is_reserved(&base) {
            base.push('_');
        }
        let key = self.key_of(&base);
        match self.unique.get_mut(&key) {
            Some(count) => {
                *count += 1;
                let name = format!("{}_{}", base, count);
                // The suffixed name might itself collide with something
                // the source spelled out; keep bumping until it is free.
                if self.unique.contains_key(&self.key_of(&name)) {
                    return self.call(&name);
                }
                self.unique.insert(self.key_of(&name), 0);
                name
            }
            None => {
                self.unique.insert(key, 0);
                base
            }
        }
    }
}

fn sanitize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Assign a unique name to every nameable entity in the module.
pub fn process_names(module: &Module, namer: &mut Namer) -> FastHashMap<NameKey, String> {
    let mut names = FastHashMap::default();
    for (handle, ty) in module.types.iter() {
        if let wgslc_core::TypeInner::Struct { ref members, .. } = ty.inner {
            let base = ty.name.as_deref().unwrap_or("Struct");
            names.insert(NameKey::Type(handle), namer.call(base));
            for (index, member) in members.iter().enumerate() {
                let member_base = member.name.as_deref().unwrap_or("member");
                // Member names only need to be unique within their struct.
                names.insert(
                    NameKey::StructMember(handle, index as u32),
                    sanitize(member_base),
                );
            }
        }
    }
    for (handle, constant) in module.constants.iter() {
        if let Some(ref name) = constant.name {
            names.insert(NameKey::Constant(handle), namer.call(name));
        }
    }
    for (handle, var) in module.global_variables.iter() {
        let base = var.name.as_deref().unwrap_or("global");
        names.insert(NameKey::GlobalVariable(handle), namer.call(base));
    }
    // Entry points claim their exported names first; the functions backing
    // them get suffixed instead.
    for (index, ep) in module.entry_points.iter().enumerate() {
        names.insert(NameKey::EntryPoint(index as u32), namer.call(&ep.name));
    }
    for (fun_handle, fun) in module.functions.iter() {
        let base = fun.name.as_deref().unwrap_or("function");
        names.insert(NameKey::Function(fun_handle), namer.call(base));
        for (index, argument) in fun.arguments.iter().enumerate() {
            let base = argument.name.as_deref().unwrap_or("param");
            names.insert(
                NameKey::FunctionArgument(fun_handle, index as u32),
                namer.call(base),
            );
        }
        for (local_handle, local) in fun.local_variables.iter() {
            let base = local.name.as_deref().unwrap_or("local");
            names.insert(
                NameKey::FunctionLocal(fun_handle, local_handle),
                namer.call(base),
            );
        }
    }
    names
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collisions_get_numeric_suffixes() {
        let mut namer = Namer::new(&[], false);
        assert_eq!(namer.call("data"), "data");
        assert_eq!(namer.call("data"), "data_1");
        assert_eq!(namer.call("data"), "data_2");
    }

    #[test]
    fn reserved_words_are_escaped() {
        let mut namer = Namer::new(&["return"], false);
        assert_eq!(namer.call("return"), "return_");
    }

    #[test]
    fn case_insensitive_targets_fold_case() {
        let mut namer = Namer::new(&[], true);
        assert_eq!(namer.call("Data"), "Data");
        assert_ne!(namer.call("data"), "data");
    }

    #[test]
    fn bad_characters_are_replaced() {
        let mut namer = Namer::new(&[], false);
        assert_eq!(namer.call("2fast"), "_2fast");
    }

    #[test]
    fn reserved_helpers_stay_unique() {
        let mut namer = Namer::new(&[], false);
        namer.reserve("_wgsl_div");
        assert_eq!(namer.call("_wgsl_div"), "_wgsl_div_1");
    }
}
