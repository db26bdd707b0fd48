//! Render graph definition and compilation
//!
//! Compilation topologically orders the passes and emits the explicit
//! producer to consumer dependency list. [`CompiledGraph::validate`]
//! re-checks the single ordering guarantee the executor relies on: no
//! pass runs before the passes that produce its inputs.

use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Graph compilation error
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Render graph contains a cycle involving passes: {0:?}")]
    Cycle(Vec<String>),
    #[error("Pass {consumer:?} is scheduled before producer {producer:?} of resource {resource:?}")]
    OrderViolation {
        producer: PassId,
        consumer: PassId,
        resource: ResourceId,
    },
}

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,

    /// External resources (like swapchain)
    external_resources: HashMap<String, ResourceId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            external_resources: HashMap::new(),
        }
    }

    /// Register an external resource (like swapchain image)
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External(id));
        self.external_resources.insert(name.to_string(), id);
        id
    }

    /// Get external resource by name
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.external_resources.get(name).copied()
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(
        &mut self,
        pass: P,
        pass_type: PassType,
        screen_width: u32,
        screen_height: u32,
    ) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
                screen_width,
                screen_height,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        id
    }

    /// Collect producer -> consumer edges: a pass depends on every pass
    /// that writes a resource it reads
    fn dependency_edges(&self) -> Vec<Barrier> {
        let mut edges = Vec::new();
        for reader in &self.pass_nodes {
            for input in &reader.inputs {
                for writer in &self.pass_nodes {
                    if writer.id != reader.id && writer.writes_resource(input.resource) {
                        edges.push(Barrier {
                            resource: input.resource,
                            producer: writer.id,
                            consumer: reader.id,
                        });
                    }
                }
            }
        }
        edges
    }

    /// Compile the graph - topological sort plus the explicit barrier list
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        let barriers = self.dependency_edges();

        let mut dependencies: HashMap<PassId, HashSet<PassId>> = self
            .pass_nodes
            .iter()
            .map(|node| (node.id, HashSet::new()))
            .collect();
        for edge in &barriers {
            if let Some(deps) = dependencies.get_mut(&edge.consumer) {
                deps.insert(edge.producer);
            }
        }

        // Kahn's algorithm; smallest id first for a deterministic order
        let mut in_degree: HashMap<PassId, usize> = self
            .pass_nodes
            .iter()
            .map(|node| (node.id, dependencies[&node.id].len()))
            .collect();

        let mut queue: Vec<PassId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort();

        let mut sorted_passes = Vec::new();

        while !queue.is_empty() {
            let pass_id = queue.remove(0);
            sorted_passes.push(pass_id);

            for node in &self.pass_nodes {
                if dependencies[&node.id].contains(&pass_id) {
                    let degree = in_degree
                        .get_mut(&node.id)
                        .ok_or_else(|| GraphError::Cycle(vec![node.name.clone()]))?;
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(node.id);
                        queue.sort();
                    }
                }
            }
        }

        if sorted_passes.len() != self.pass_nodes.len() {
            let stuck: Vec<String> = self
                .pass_nodes
                .iter()
                .filter(|n| !sorted_passes.contains(&n.id))
                .map(|n| n.name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        // Determine resource lifetimes
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();

        for (order, &pass_id) in sorted_passes.iter().enumerate() {
            if let Some(node) = self.pass_nodes.iter().find(|n| n.id == pass_id) {
                for access in node.inputs.iter().chain(node.outputs.iter()) {
                    let lifetime = resource_lifetimes
                        .entry(access.resource)
                        .or_insert(ResourceLifetime {
                            first_use: order,
                            last_use: order,
                        });
                    lifetime.last_use = order;
                }
            }
        }

        let compiled = CompiledGraph {
            pass_order: sorted_passes,
            barriers,
            resource_lifetimes,
        };
        compiled.validate()?;
        Ok(compiled)
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass>] {
        &mut self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get mutable pass by ID
    pub fn get_pass_mut(&mut self, id: PassId) -> Option<&mut (dyn RenderPass + 'static)> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_mut())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit dependency of one pass on the output of another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub producer: PassId,
    pub consumer: PassId,
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled render graph with execution order, barriers and lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub barriers: Vec<Barrier>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Check that every consumer is scheduled after its producer
    pub fn validate(&self) -> Result<(), GraphError> {
        let position: HashMap<PassId, usize> = self
            .pass_order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        for barrier in &self.barriers {
            let (Some(&prod), Some(&cons)) = (
                position.get(&barrier.producer),
                position.get(&barrier.consumer),
            ) else {
                continue;
            };
            if prod >= cons {
                return Err(GraphError::OrderViolation {
                    producer: barrier.producer,
                    consumer: barrier.consumer,
                    resource: barrier.resource,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{TextureFormat, TextureUsage};
    use std::any::Any;

    struct TestPass {
        name: String,
        creates: Vec<String>,
        reads: Vec<ResourceId>,
        writes: Vec<ResourceId>,
        created: Vec<ResourceId>,
    }

    impl TestPass {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                creates: Vec::new(),
                reads: Vec::new(),
                writes: Vec::new(),
                created: Vec::new(),
            }
        }

        fn creating(mut self, name: &str) -> Self {
            self.creates.push(name.to_string());
            self
        }

        fn reading(mut self, id: ResourceId) -> Self {
            self.reads.push(id);
            self
        }

        fn writing(mut self, id: ResourceId) -> Self {
            self.writes.push(id);
            self
        }
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for name in &self.creates {
                let id = ctx.create_texture_relative(
                    name,
                    TextureSize::default(),
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                );
                ctx.write(id, ResourceUsage::RenderTarget);
                self.created.push(id);
            }
            for &id in &self.reads {
                ctx.read(id, ResourceUsage::TextureRead);
            }
            for &id in &self.writes {
                ctx.write(id, ResourceUsage::RenderTarget);
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) {}

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn created_resource(graph: &RenderGraph, pass: PassId) -> ResourceId {
        graph.get_pass_node(pass).unwrap().outputs[0].resource
    }

    #[test]
    fn consumer_runs_after_producer() {
        let mut graph = RenderGraph::new();
        let producer = graph.add_pass(
            TestPass::new("producer").creating("target"),
            PassType::Graphics,
            64,
            64,
        );
        let target = created_resource(&graph, producer);
        let consumer = graph.add_pass(
            TestPass::new("consumer").reading(target),
            PassType::Graphics,
            64,
            64,
        );

        let compiled = graph.compile().unwrap();
        let pos = |id| compiled.pass_order.iter().position(|&p| p == id).unwrap();
        assert!(pos(producer) < pos(consumer));
        assert!(compiled.validate().is_ok());
    }

    #[test]
    fn emits_barrier_per_dependency() {
        let mut graph = RenderGraph::new();
        let producer = graph.add_pass(
            TestPass::new("gbuffer").creating("normal").creating("albedo"),
            PassType::Graphics,
            64,
            64,
        );
        let node = graph.get_pass_node(producer).unwrap();
        let normal = node.outputs[0].resource;
        let albedo = node.outputs[1].resource;
        let consumer = graph.add_pass(
            TestPass::new("lighting").reading(normal).reading(albedo),
            PassType::Graphics,
            64,
            64,
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.barriers.len(), 2);
        for barrier in &compiled.barriers {
            assert_eq!(barrier.producer, producer);
            assert_eq!(barrier.consumer, consumer);
        }
    }

    #[test]
    fn independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::new();
        let shadow = graph.add_pass(
            TestPass::new("shadow").creating("shadow_map"),
            PassType::Graphics,
            64,
            64,
        );
        let gbuffer = graph.add_pass(
            TestPass::new("gbuffer").creating("normal"),
            PassType::Graphics,
            64,
            64,
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order, vec![shadow, gbuffer]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = RenderGraph::new();
        let a_id = graph.add_pass(
            TestPass::new("a").creating("res_a"),
            PassType::Graphics,
            64,
            64,
        );
        let res_a = created_resource(&graph, a_id);
        let b_id = graph.add_pass(
            TestPass::new("b").creating("res_b").reading(res_a),
            PassType::Graphics,
            64,
            64,
        );
        let res_b = created_resource(&graph, b_id);
        // a also reads what b writes, closing the loop
        graph.pass_nodes[0].inputs.push(ResourceAccess {
            resource: res_b,
            usage: ResourceUsage::TextureRead,
        });

        assert!(matches!(graph.compile(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn validate_rejects_reordered_schedule() {
        let mut graph = RenderGraph::new();
        let producer = graph.add_pass(
            TestPass::new("producer").creating("target"),
            PassType::Graphics,
            64,
            64,
        );
        let target = created_resource(&graph, producer);
        let consumer = graph.add_pass(
            TestPass::new("consumer").reading(target),
            PassType::Graphics,
            64,
            64,
        );

        let mut compiled = graph.compile().unwrap();
        compiled.pass_order = vec![consumer, producer];
        assert!(matches!(
            compiled.validate(),
            Err(GraphError::OrderViolation { .. })
        ));
    }

    #[test]
    fn lifetimes_span_first_to_last_use() {
        let mut graph = RenderGraph::new();
        let producer = graph.add_pass(
            TestPass::new("gbuffer").creating("normal"),
            PassType::Graphics,
            64,
            64,
        );
        let normal = created_resource(&graph, producer);
        graph.add_pass(
            TestPass::new("lighting").reading(normal),
            PassType::Graphics,
            64,
            64,
        );
        graph.add_pass(
            TestPass::new("composite").reading(normal),
            PassType::Graphics,
            64,
            64,
        );

        let compiled = graph.compile().unwrap();
        let lifetime = compiled.resource_lifetimes[&normal];
        assert_eq!(lifetime.first_use, 0);
        assert_eq!(lifetime.last_use, 2);
    }

    #[test]
    fn chained_compute_passes_are_ordered() {
        let mut graph = RenderGraph::new();
        let raw = graph.add_pass(
            TestPass::new("ssao").creating("ao_raw"),
            PassType::Compute,
            64,
            64,
        );
        let ao_raw = created_resource(&graph, raw);
        let blur = graph.add_pass(
            TestPass::new("ssao_blur").creating("ao").reading(ao_raw),
            PassType::Compute,
            64,
            64,
        );
        let ao = graph.get_pass_node(blur).unwrap().outputs[0].resource;
        let lighting = graph.add_pass(
            TestPass::new("lighting").reading(ao),
            PassType::Graphics,
            64,
            64,
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order, vec![raw, blur, lighting]);
    }
}
