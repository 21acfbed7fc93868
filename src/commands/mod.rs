pub mod backtest;
pub mod download;
pub mod optimize;
pub mod results;
pub mod signals;
pub mod symbols;

use strategy_optimizer::backtest::BacktestResult;

/// Shared summary block for a backtest result
pub fn print_result(result: &BacktestResult) {
    let p = &result.parameters;
    println!("  Grid Size:      {}", p.grid_size);
    println!("  Grid Spacing:   {:.4}", p.grid_spacing);
    println!("  Max Positions:  {}", p.max_positions);
    println!("  Stop Loss:      {:.4}", p.stop_loss);
    println!("  Take Profit:    {:.4}", p.take_profit);
    println!("{}", "-".repeat(60));
    println!("  Total Profit:   {:.2}", result.total_profit);
    println!("  Final Balance:  {:.2}", result.final_balance);
    println!("  Total Trades:   {}", result.total_trades);
    println!("  Win Rate:       {:.2}%", result.win_rate);
    println!("  Avg Profit:     {:.2}", result.avg_profit);
    println!("  Max Drawdown:   {:.2}%", result.max_drawdown);
    println!("  Sharpe Ratio:   {:.2}", result.sharpe_ratio);
}
