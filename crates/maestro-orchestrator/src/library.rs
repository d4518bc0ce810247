use crate::types::{TaskSpec, WorkflowDefinition};

/// Create the built-in workflow library.
///
/// Each task stores its output under `dependencies.<task id>` so downstream
/// templates can reference upstream results by task id.
pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![
        pattern_development(),
        oss_contribution(),
        learning_path(),
        pattern_review(),
        student_onboarding(),
        agi_research(),
        world_problem(),
    ]
}

fn task(id: &str, agent: &str, prompt: &str) -> TaskSpec {
    TaskSpec::new(id, agent, prompt).with_variable_key(format!("dependencies.{id}"))
}

fn pattern_development() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "PATTERN_DEVELOPMENT",
        "pattern-development",
        "End-to-end workflow for creating a new AI pattern from requirements to deployment",
        vec![
            task(
                "analyze-requirements",
                "architecture-reviewer",
                "Analyze the following pattern requirements and recommend a technical architecture.\n\n\
                 Requirements: {{requirements}}",
            ),
            task(
                "build-pattern",
                "pattern-builder",
                "Build a production-ready implementation of this architecture.\n\n\
                 Architecture: {{dependencies.analyze-requirements}}",
            )
            .depends_on(["analyze-requirements"]),
            task(
                "quality-review",
                "qa-agent",
                "Run a full quality review of the implemented pattern.\n\n\
                 Pattern Code: {{dependencies.build-pattern}}",
            )
            .depends_on(["build-pattern"]),
            task(
                "compliance-check",
                "compliance-checker",
                "Check the pattern against applicable regulations.\n\n\
                 Pattern Code: {{dependencies.build-pattern}}\n\
                 Intended Use: {{use_case}}",
            )
            .depends_on(["build-pattern"]),
            task(
                "optimize-pattern",
                "pattern-optimizer",
                "Optimize the implementation for latency, cost and reliability.\n\n\
                 Current Implementation: {{dependencies.build-pattern}}\n\
                 QA Findings: {{dependencies.quality-review}}",
            )
            .depends_on(["build-pattern", "quality-review"]),
            task(
                "generate-documentation",
                "documentation-agent",
                "Write complete documentation for the pattern.\n\n\
                 Pattern Code: {{dependencies.optimize-pattern}}\n\
                 Architecture: {{dependencies.analyze-requirements}}\n\
                 QA Report: {{dependencies.quality-review}}\n\
                 Compliance Status: {{dependencies.compliance-check}}",
            )
            .depends_on(["optimize-pattern", "quality-review", "compliance-check"]),
        ],
    )
}

fn oss_contribution() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "OSS_CONTRIBUTION",
        "oss-contribution",
        "Workflow for contributing a pattern to the GitHub OSS repository",
        vec![
            task(
                "validate-pattern",
                "qa-agent",
                "Validate this pattern for open-source release.\n\nPattern: {{pattern_code}}",
            ),
            task(
                "generate-readme",
                "documentation-agent",
                "Write the README for this pattern.\n\n\
                 Pattern: {{pattern_code}}\n\
                 Validation: {{dependencies.validate-pattern}}",
            )
            .depends_on(["validate-pattern"]),
            task(
                "prepare-pr",
                "github-integration",
                "Prepare the pull request for this contribution.\n\n\
                 Pattern: {{pattern_code}}\n\
                 README: {{dependencies.generate-readme}}\n\
                 Validation: {{dependencies.validate-pattern}}",
            )
            .depends_on(["generate-readme", "validate-pattern"]),
        ],
    )
}

fn learning_path() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "LEARNING_PATH",
        "learning-path-creation",
        "Create a structured learning path for a specific AI topic",
        vec![
            task(
                "design-curriculum",
                "learning-assistant",
                "Design a learning curriculum for: {{topic}}\n\n\
                 Target Audience: {{audience_level}}\n\
                 Duration: {{duration_weeks}} weeks",
            ),
            task(
                "create-modules",
                "documentation-agent",
                "Write the learning modules for this curriculum.\n\n\
                 Curriculum: {{dependencies.design-curriculum}}",
            )
            .depends_on(["design-curriculum"]),
            task(
                "build-projects",
                "pattern-builder",
                "Build hands-on projects for the curriculum.\n\n\
                 Curriculum: {{dependencies.design-curriculum}}\n\
                 Modules: {{dependencies.create-modules}}",
            )
            .depends_on(["design-curriculum", "create-modules"]),
        ],
    )
}

fn pattern_review() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "PATTERN_REVIEW",
        "pattern-review",
        "Comprehensive review of an existing pattern",
        vec![
            task(
                "architecture-review",
                "architecture-reviewer",
                "Review the architecture of this pattern.\n\n\
                 Pattern: {{pattern_code}}\n\
                 Pattern Type: {{pattern_type}}",
            ),
            task(
                "security-review",
                "qa-agent",
                "Review this pattern for security vulnerabilities.\n\nPattern: {{pattern_code}}",
            ),
            task(
                "compliance-review",
                "compliance-checker",
                "Review this pattern for regulatory compliance.\n\n\
                 Pattern: {{pattern_code}}\n\
                 Use Case: {{use_case}}\n\
                 Target Industry: {{industry}}",
            ),
            task(
                "optimization-recommendations",
                "pattern-optimizer",
                "Recommend optimizations for this pattern.\n\n\
                 Pattern: {{pattern_code}}\n\
                 Architecture Review: {{dependencies.architecture-review}}\n\
                 Security Review: {{dependencies.security-review}}",
            )
            .depends_on(["architecture-review", "security-review"]),
            task(
                "consolidate-review",
                "documentation-agent",
                "Consolidate all findings into one review document.\n\n\
                 Architecture Review: {{dependencies.architecture-review}}\n\
                 Security Review: {{dependencies.security-review}}\n\
                 Compliance Review: {{dependencies.compliance-review}}\n\
                 Optimization Recommendations: {{dependencies.optimization-recommendations}}",
            )
            .depends_on([
                "architecture-review",
                "security-review",
                "compliance-review",
                "optimization-recommendations",
            ]),
        ],
    )
}

fn student_onboarding() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "STUDENT_ONBOARDING",
        "student-onboarding",
        "Personalized onboarding experience for new students",
        vec![
            task(
                "assess-background",
                "learning-assistant",
                "Assess this new student's background.\n\n\
                 - Current Role: {{current_role}}\n\
                 - Experience Level: {{experience_level}}\n\
                 - Goals: {{goals}}\n\
                 - Available Time: {{hours_per_week}} hours/week\n\
                 - Preferred Learning Style: {{learning_style}}",
            ),
            task(
                "curate-resources",
                "documentation-agent",
                "Curate learning resources for this student.\n\n\
                 Student Assessment: {{dependencies.assess-background}}",
            )
            .depends_on(["assess-background"]),
            task(
                "create-first-project",
                "pattern-builder",
                "Design the student's first hands-on project.\n\n\
                 Student Profile: {{dependencies.assess-background}}\n\
                 Resources: {{dependencies.curate-resources}}",
            )
            .depends_on(["assess-background", "curate-resources"]),
        ],
    )
}

fn agi_research() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "AGI_RESEARCH",
        "agi-research",
        "Comprehensive AGI research workflow for analyzing architectures, evaluating alignment, and assessing safety",
        vec![
            task(
                "analyze-architecture",
                "agi-researcher",
                "Analyze this AGI architecture.\n\n\
                 Research Focus: {{research_topic}}\n\
                 Architecture Type: {{architecture_type}}\n\
                 Scale Parameters: {{scale_parameters}}",
            ),
            task(
                "evaluate-alignment",
                "alignment-checker",
                "Evaluate the alignment properties of this architecture.\n\n\
                 Architecture Analysis: {{dependencies.analyze-architecture}}\n\
                 Deployment Context: {{deployment_context}}",
            )
            .depends_on(["analyze-architecture"]),
            task(
                "build-world-model",
                "world-model-builder",
                "Build a world model for the target domain.\n\n\
                 Architecture Analysis: {{dependencies.analyze-architecture}}\n\
                 Alignment Evaluation: {{dependencies.evaluate-alignment}}\n\
                 Target Domain: {{target_domain}}",
            )
            .depends_on(["analyze-architecture", "evaluate-alignment"]),
            task(
                "safety-audit",
                "safety-auditor",
                "Conduct a safety audit.\n\n\
                 Architecture Analysis: {{dependencies.analyze-architecture}}\n\
                 Alignment Evaluation: {{dependencies.evaluate-alignment}}\n\
                 World Model: {{dependencies.build-world-model}}\n\
                 Compliance Requirements: {{compliance_standards}}",
            )
            .depends_on(["analyze-architecture", "evaluate-alignment", "build-world-model"]),
        ],
    )
}

fn world_problem() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "WORLD_PROBLEM",
        "world-problem-solving",
        "Multi-agent workflow for analyzing and solving complex real-world challenges using AI systems",
        vec![
            task(
                "model-problem-domain",
                "world-model-builder",
                "Model this problem domain.\n\n\
                 Problem Domain: {{problem_domain}}\n\
                 Geographic Scope: {{geographic_scope}}\n\
                 Time Horizon: {{time_horizon}}\n\
                 Key Stakeholders: {{stakeholders}}",
            ),
            task(
                "research-solutions",
                "agi-researcher",
                "Research candidate solutions.\n\n\
                 World Model: {{dependencies.model-problem-domain}}\n\
                 Solution Constraints: {{solution_constraints}}\n\
                 Available Resources: {{available_resources}}",
            )
            .depends_on(["model-problem-domain"]),
            task(
                "alignment-review",
                "alignment-checker",
                "Review the proposed solutions for alignment with human values.\n\n\
                 World Model: {{dependencies.model-problem-domain}}\n\
                 Proposed Solutions: {{dependencies.research-solutions}}\n\
                 Ethical Framework: {{ethical_framework}}",
            )
            .depends_on(["model-problem-domain", "research-solutions"]),
            task(
                "safety-assessment",
                "safety-auditor",
                "Assess the safety of the proposed solutions.\n\n\
                 World Model: {{dependencies.model-problem-domain}}\n\
                 Proposed Solutions: {{dependencies.research-solutions}}\n\
                 Alignment Review: {{dependencies.alignment-review}}\n\
                 Regulatory Context: {{regulatory_context}}",
            )
            .depends_on(["model-problem-domain", "research-solutions", "alignment-review"]),
            task(
                "synthesize-implementation-plan",
                "documentation-agent",
                "Synthesize a phased implementation plan.\n\n\
                 World Model: {{dependencies.model-problem-domain}}\n\
                 Solutions Research: {{dependencies.research-solutions}}\n\
                 Alignment Review: {{dependencies.alignment-review}}\n\
                 Safety Assessment: {{dependencies.safety-assessment}}",
            )
            .depends_on([
                "model-problem-domain",
                "research-solutions",
                "alignment-review",
                "safety-assessment",
            ]),
        ],
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::resolver;

    #[test]
    fn test_builtin_types() {
        let types: Vec<String> = builtin_workflows()
            .into_iter()
            .map(|w| w.workflow_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "PATTERN_DEVELOPMENT",
                "OSS_CONTRIBUTION",
                "LEARNING_PATH",
                "PATTERN_REVIEW",
                "STUDENT_ONBOARDING",
                "AGI_RESEARCH",
                "WORLD_PROBLEM",
            ]
        );
    }

    #[test]
    fn test_pattern_development_waves() {
        let plan = resolver::plan(&pattern_development().tasks).unwrap();
        let waves: Vec<Vec<&str>> = plan
            .waves()
            .iter()
            .map(|w| w.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(
            waves,
            vec![
                vec!["analyze-requirements"],
                vec!["build-pattern"],
                vec!["quality-review", "compliance-check"],
                vec!["optimize-pattern"],
                vec!["generate-documentation"],
            ]
        );
    }

    #[test]
    fn test_pattern_review_runs_three_reviews_in_parallel() {
        let plan = resolver::plan(&pattern_review().tasks).unwrap();
        assert_eq!(
            plan.waves()[0],
            vec!["architecture-review", "security-review", "compliance-review"]
        );
        assert_eq!(plan.wave_count(), 3);
    }

    #[test]
    fn test_required_variables_are_caller_inputs_only() {
        let required: Vec<String> = learning_path()
            .derive_required_variables()
            .into_iter()
            .collect();
        assert_eq!(required, vec!["audience_level", "duration_weeks", "topic"]);

        let oss: Vec<String> = oss_contribution()
            .derive_required_variables()
            .into_iter()
            .collect();
        assert_eq!(oss, vec!["pattern_code"]);
    }
}
