use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::database::{Database, JsonDatabase, MemoryDatabase};
use crate::error::{ConfigError, PluginError, QuireError};
use crate::key::ArcStr;
use crate::parser::{JsonParser, Parser, TextParser};
use crate::task::{TaskFactory, builtin_bundle, builtin_doc, builtin_pattern};

/// Constructor for a cache backend selected by name.
pub type DatabaseConstructor =
    Arc<dyn Fn(&RunConfig) -> anyhow::Result<Box<dyn Database>> + Send + Sync>;

struct Category {
    aliases: Vec<ArcStr>,
    factory: Arc<dyn TaskFactory>,
}

/// Registration table mapping category aliases to task factories,
/// configuration filenames to parsers and backend names to databases.
///
/// Everything is validated when it is registered, so a key can only fail to
/// resolve because it names a category nobody registered.
#[derive(Default)]
pub struct Registry {
    categories: Vec<Category>,
    aliases: HashMap<ArcStr, usize>,
    parsers: Vec<(String, Arc<dyn Parser>)>,
    databases: HashMap<String, DatabaseConstructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The categories, parsers and backends shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry
            .register_category(&["doc", "file"], builtin_doc)
            .expect("builtin aliases are unique");
        registry
            .register_category(&["bundle", "group"], builtin_bundle)
            .expect("builtin aliases are unique");
        registry
            .register_category(&["pattern", "glob"], builtin_pattern)
            .expect("builtin aliases are unique");

        registry
            .register_parser("quire.json", JsonParser)
            .expect("builtin parser names are unique");
        #[cfg(feature = "yaml")]
        registry
            .register_parser("quire.yaml", crate::parser::YamlParser)
            .expect("builtin parser names are unique");
        registry
            .register_parser("quire.txt", TextParser)
            .expect("builtin parser names are unique");

        registry
            .register_database("json", |config: &RunConfig| {
                Ok(Box::new(JsonDatabase::open(config.db_path())?) as Box<dyn Database>)
            })
            .expect("builtin backend names are unique");
        registry
            .register_database("memory", |_: &RunConfig| {
                Ok(Box::new(MemoryDatabase::new()) as Box<dyn Database>)
            })
            .expect("builtin backend names are unique");

        registry
    }

    /// Registers a category under one or more aliases. The first alias is the
    /// canonical spelling used in task keys.
    pub fn register_category<F>(&mut self, aliases: &[&str], factory: F) -> Result<(), ConfigError>
    where
        F: TaskFactory + 'static,
    {
        if aliases.is_empty() {
            return Err(ConfigError::EmptyAliases);
        }

        for (i, alias) in aliases.iter().enumerate() {
            if self.aliases.contains_key(*alias) || aliases[..i].contains(alias) {
                return Err(ConfigError::DuplicateAlias(alias.to_string()));
            }
        }

        let index = self.categories.len();
        let aliases: Vec<ArcStr> = aliases.iter().map(|alias| ArcStr::from(*alias)).collect();

        for alias in &aliases {
            self.aliases.insert(alias.clone(), index);
        }

        self.categories.push(Category {
            aliases,
            factory: Arc::new(factory),
        });

        Ok(())
    }

    /// Registers a parser for configuration files with the given name.
    /// Fragments are discovered in registration order.
    pub fn register_parser<P>(&mut self, filename: &str, parser: P) -> Result<(), ConfigError>
    where
        P: Parser + 'static,
    {
        if self.parsers.iter().any(|(name, _)| name == filename) {
            return Err(ConfigError::DuplicateAlias(filename.to_string()));
        }

        self.parsers.push((filename.to_string(), Arc::new(parser)));
        Ok(())
    }

    pub fn register_database<F>(&mut self, alias: &str, constructor: F) -> Result<(), ConfigError>
    where
        F: Fn(&RunConfig) -> anyhow::Result<Box<dyn Database>> + Send + Sync + 'static,
    {
        if self.databases.contains_key(alias) {
            return Err(ConfigError::DuplicateAlias(alias.to_string()));
        }

        self.databases.insert(alias.to_string(), Arc::new(constructor));
        Ok(())
    }

    /// Maps any registered alias onto its canonical category name.
    pub fn standardize(&self, alias: &str) -> Option<&str> {
        let index = *self.aliases.get(alias)?;
        Some(&*self.categories[index].aliases[0])
    }

    pub fn factory(&self, category: &str) -> Option<&dyn TaskFactory> {
        let index = *self.aliases.get(category)?;
        Some(self.categories[index].factory.as_ref())
    }

    /// Canonical names of all registered categories.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .map(|category| &*category.aliases[0])
    }

    pub fn parsers(&self) -> impl Iterator<Item = (&str, &Arc<dyn Parser>)> {
        self.parsers
            .iter()
            .map(|(name, parser)| (name.as_str(), parser))
    }

    pub fn open_database(&self, config: &RunConfig) -> Result<Box<dyn Database>, QuireError> {
        let constructor = self
            .databases
            .get(&config.db_alias)
            .ok_or_else(|| ConfigError::UnknownDatabase(config.db_alias.clone()))?;

        let database = constructor(config).map_err(|source| PluginError::Database {
            alias: config.db_alias.clone(),
            source,
        })?;

        Ok(database)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut databases: Vec<_> = self.databases.keys().collect();
        databases.sort();

        f.debug_struct("Registry")
            .field(
                "categories",
                &self.categories.iter().map(|c| &c.aliases).collect::<Vec<_>>(),
            )
            .field(
                "parsers",
                &self.parsers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("databases", &databases)
            .finish()
    }
}
